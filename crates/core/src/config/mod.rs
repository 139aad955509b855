use serde::{Deserialize, Serialize};

use crate::{Result, ScopeError};

pub const MIN_SHOW_INTERVAL: f64 = 0.1;
pub const MAX_SINGLE_ANIMATE: f64 = 30.0;
pub const MIN_WAV_DURATION: f64 = 1.0;
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Which branch of the frame resolver drives playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// One asset, drawn in once and then held.
    #[default]
    Single,
    /// The playlist, one segment of `show_interval` seconds per asset, looping.
    Show,
}

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Parses a JSON configuration document. Every timeline value is passed
    /// through the validating setters, so out-of-range input is clamped
    /// rather than trusted.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: AppConfig = serde_json::from_str(text)?;
        let mut config = AppConfig {
            timeline: TimelineConfig::default(),
            audio: raw.audio,
        };
        config.timeline.apply(&raw.timeline);
        config.audio.sample_rate = config.timeline.sample_rate();
        if config.audio.block_size == 0 {
            config.audio.block_size = AudioConfig::default().block_size;
        }
        Ok(config)
    }
}

/// Configuration specific to the audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
        }
    }
}

/// Timeline parameters shared by the resolver, both renderers and the
/// visualiser. Fields are private so every update goes through validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    mode: PlaybackMode,
    show_interval: f64,
    animate_duration: f64,
    wav_duration: f64,
    gain: f32,
    sample_rate: u32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::Single,
            show_interval: 10.0,
            animate_duration: 0.0,
            wav_duration: 5.0,
            gain: 1.0,
            sample_rate: 48_000,
        }
    }
}

impl TimelineConfig {
    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn show_interval(&self) -> f64 {
        self.show_interval
    }

    pub fn animate_duration(&self) -> f64 {
        self.animate_duration
    }

    pub fn wav_duration(&self) -> f64 {
        self.wav_duration
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Upper bound for the draw-in duration in the current mode.
    pub fn animate_limit(&self) -> f64 {
        match self.mode {
            PlaybackMode::Single => MAX_SINGLE_ANIMATE,
            PlaybackMode::Show => self.show_interval,
        }
    }

    /// Switches the playback mode and re-clamps the draw-in duration to the
    /// new mode's limit.
    pub fn set_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
        self.reclamp_animate();
    }

    /// Sets seconds per show segment. Returns the value actually applied.
    pub fn set_show_interval(&mut self, value: f64) -> f64 {
        self.show_interval = checked_or_clamped(
            check_range("show interval", value, MIN_SHOW_INTERVAL, f64::MAX),
            value,
            MIN_SHOW_INTERVAL,
            f64::MAX,
        );
        self.reclamp_animate();
        self.show_interval
    }

    /// Sets the draw-in duration. Returns the value actually applied.
    pub fn set_animate_duration(&mut self, value: f64) -> f64 {
        let limit = self.animate_limit();
        self.animate_duration = checked_or_clamped(
            check_range("animate duration", value, 0.0, limit),
            value,
            0.0,
            limit,
        );
        self.animate_duration
    }

    /// Sets the export length in seconds. Returns the value actually applied.
    /// There is no upper bound here; the exporter rejects lengths that do not
    /// fit the WAV container.
    pub fn set_wav_duration(&mut self, value: f64) -> f64 {
        self.wav_duration = checked_or_clamped(
            check_range("wav duration", value, MIN_WAV_DURATION, f64::MAX),
            value,
            MIN_WAV_DURATION,
            f64::MAX,
        );
        self.wav_duration
    }

    pub fn set_gain(&mut self, value: f32) -> f32 {
        self.gain = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            1.0
        };
        if self.gain != value {
            tracing::warn!(requested = value, applied = self.gain, "gain clamped");
        }
        self.gain
    }

    pub fn set_sample_rate(&mut self, value: u32) -> u32 {
        self.sample_rate = value.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
        if self.sample_rate != value {
            tracing::warn!(
                requested = value,
                applied = self.sample_rate,
                "sample rate clamped"
            );
        }
        self.sample_rate
    }

    /// Copies every field of `other` through the validating setters.
    pub fn apply(&mut self, other: &TimelineConfig) {
        self.set_mode(other.mode);
        self.set_show_interval(other.show_interval);
        self.set_animate_duration(other.animate_duration);
        self.set_wav_duration(other.wav_duration);
        self.set_gain(other.gain);
        self.set_sample_rate(other.sample_rate);
    }

    fn reclamp_animate(&mut self) {
        let limit = self.animate_limit();
        if self.animate_duration > limit {
            tracing::debug!(
                from = self.animate_duration,
                to = limit,
                "animate duration follows its new limit"
            );
            self.animate_duration = limit;
        }
    }
}

/// Validates a duration against `[min, max]`.
pub fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<f64> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(ScopeError::InvalidDuration { name, value })
    }
}

fn checked_or_clamped(checked: Result<f64>, value: f64, min: f64, max: f64) -> f64 {
    checked.unwrap_or_else(|err| {
        let applied = if value.is_finite() {
            value.clamp(min, max)
        } else {
            min
        };
        tracing::warn!(%err, applied, "clamping configuration value");
        applied
    })
}
