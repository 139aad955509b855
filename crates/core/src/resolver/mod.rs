//! The frame resolver maps a play position onto the active signal and its
//! draw-in progress. It is the only place that knows how show segments and
//! draw-in windows are laid out on the timeline; the real-time renderer, the
//! visualiser and the exporter all call into it.

use std::sync::Arc;

use crate::{PlaybackMode, Signal};

/// Output of [`resolve`] for one play position.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedFrame<'a> {
    /// Signal to play or draw, if any.
    pub signal: Option<&'a Arc<Signal>>,
    /// Fraction of the signal revealed so far, in `[0, 1]`.
    pub progress: f64,
    /// Playlist index in show mode.
    pub index: Option<usize>,
    /// Seconds since the active segment started.
    pub segment_time: f64,
}

impl<'a> ResolvedFrame<'a> {
    fn silent() -> Self {
        Self {
            signal: None,
            progress: 1.0,
            index: None,
            segment_time: 0.0,
        }
    }

    /// Number of leading samples that are revealed:
    /// `floor(signal.len() * progress)`, or zero without a signal.
    pub fn visible_len(&self) -> usize {
        self.signal
            .map(|signal| visible_len(signal.len(), self.progress))
            .unwrap_or(0)
    }
}

/// Resolves the active signal and draw-in progress at `position` seconds.
pub fn resolve<'a>(
    position: f64,
    mode: PlaybackMode,
    playlist: &'a [Arc<Signal>],
    single: Option<&'a Arc<Signal>>,
    show_interval: f64,
    animate_duration: f64,
) -> ResolvedFrame<'a> {
    match mode {
        PlaybackMode::Single => ResolvedFrame {
            signal: single,
            progress: draw_in_progress(position, animate_duration),
            index: None,
            segment_time: position,
        },
        PlaybackMode::Show => {
            if playlist.is_empty() || show_interval <= 0.0 {
                return ResolvedFrame::silent();
            }
            let index = show_index(position, show_interval, playlist.len());
            let segment_time = position.rem_euclid(show_interval);
            ResolvedFrame {
                signal: Some(&playlist[index]),
                progress: draw_in_progress(segment_time, animate_duration),
                index: Some(index),
                segment_time,
            }
        }
    }
}

/// `clamp(elapsed / animate_duration, 0, 1)`. A zero-length draw-in is
/// already complete.
pub fn draw_in_progress(elapsed: f64, animate_duration: f64) -> f64 {
    if animate_duration <= 0.0 {
        return 1.0;
    }
    // max/min rather than clamp so NaN collapses to 0.
    (elapsed / animate_duration).max(0.0).min(1.0)
}

/// `floor(position / show_interval) mod len`.
pub fn show_index(position: f64, show_interval: f64, len: usize) -> usize {
    let segment = (position / show_interval).floor();
    if segment.is_finite() && segment > 0.0 {
        (segment as u64 % len as u64) as usize
    } else {
        0
    }
}

pub fn visible_len(len: usize, progress: f64) -> usize {
    ((len as f64 * progress).floor() as usize).min(len)
}
