use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::Result;

/// Default display refresh cadence for the timeline tick.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_micros(16_667);

/// PlayPosition in seconds, shared between the timeline tick, seeks and the
/// audio callback. Stored as `f64` bits so reads and writes never block.
#[derive(Debug, Default)]
pub struct PlayPosition {
    bits: AtomicU64,
}

impl PlayPosition {
    pub fn new(seconds: f64) -> Self {
        Self {
            bits: AtomicU64::new(sanitize(seconds).to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Jumps to `seconds`. Negative or non-finite input maps to 0.
    pub fn set(&self, seconds: f64) {
        self.bits.store(sanitize(seconds).to_bits(), Ordering::Release);
    }

    /// Atomically adds `delta` and applies show looping. A concurrent seek is
    /// never overwritten by a stale read.
    pub fn advance(&self, delta: f64, loop_length: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = advance_position(f64::from_bits(current), delta, loop_length);
            match self.bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Adds `delta` to `position`, wrapping to exactly 0 once `loop_length` is
/// reached. A zero `loop_length` never wraps.
pub fn advance_position(position: f64, delta: f64, loop_length: f64) -> f64 {
    let mut next = position;
    if delta.is_finite() && delta > 0.0 {
        next += delta;
    }
    if loop_length > 0.0 && next >= loop_length {
        next = 0.0;
    }
    next
}

fn sanitize(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    }
}

/// Wall-clock driven play position.
///
/// The clock measures the delta since the previous tick rather than since
/// the session started, so irregular tick intervals do not accumulate error.
/// `loop_length` is the full show duration; zero disables wrapping (single
/// mode and empty playlists).
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    position: Arc<PlayPosition>,
    last_tick: Option<Instant>,
    playing: bool,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock that drives an existing shared position.
    pub fn with_position(position: Arc<PlayPosition>) -> Self {
        Self {
            position,
            last_tick: None,
            playing: false,
        }
    }

    pub fn shared_position(&self) -> Arc<PlayPosition> {
        self.position.clone()
    }

    pub fn position(&self) -> f64 {
        self.position.get()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Resumes ticking from the retained position.
    pub fn start(&mut self, now: Instant) {
        self.playing = true;
        self.last_tick = Some(now);
    }

    /// Stops advancing. The position is kept.
    pub fn stop(&mut self) {
        self.playing = false;
        self.last_tick = None;
    }

    pub fn reset(&mut self) {
        self.position.set(0.0);
    }

    pub fn seek(&mut self, position: f64) {
        self.position.set(position);
    }

    /// Advances by the wall-clock time elapsed since the previous tick and
    /// returns the new position.
    pub fn tick(&mut self, now: Instant, loop_length: f64) -> f64 {
        if !self.playing {
            return self.position.get();
        }
        let delta = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last_tick = Some(now);
        self.advance(delta, loop_length)
    }

    pub fn advance(&mut self, delta: f64, loop_length: f64) -> f64 {
        self.position.advance(delta, loop_length)
    }
}

/// Periodic worker that calls a closure once per period until stopped.
///
/// Used to drive the [`PlaybackClock`] and the visualiser at display
/// cadence, independently of the audio callback.
pub struct TickTask {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickTask {
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Result<Self>
    where
        F: FnMut(Instant) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("timeline-tick".into())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    on_tick(Instant::now());
                    thread::park_timeout(period);
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signals the worker and waits for it to exit. No tick runs after this
    /// returns.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            tracing::warn!("timeline tick worker panicked");
        }
    }
}

impl Drop for TickTask {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TickTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickTask")
            .field("running", &self.is_running())
            .finish()
    }
}
