//! Offline WAV export.
//!
//! Produces `sample_rate * wav_duration` stereo frames as if playback had run
//! from position zero, using the frame resolver for signal selection and
//! draw-in progress. Sample selection uses a per-window index
//! (`(i mod window_samples) mod signal.len()`), which differs from the
//! real-time scan cursor; the two are kept separate on purpose.

use std::io::Cursor;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver},
    Arc,
};
use std::thread;

use crate::config::{
    check_range, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, MIN_SHOW_INTERVAL, MIN_WAV_DURATION,
};
use crate::{resolver, PlaybackMode, Result, Scene, ScopeError, TimelineConfig};

pub const WAV_HEADER_LEN: usize = 44;
pub const CHANNELS: u16 = 2;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const BYTES_PER_FRAME: u64 = (CHANNELS as u64) * (BITS_PER_SAMPLE as u64 / 8);
/// Largest data chunk that still lets the RIFF size field fit in 32 bits.
pub const MAX_DATA_BYTES: u64 = 0xFFFF_FFFF - WAV_HEADER_LEN as u64;

const CANCEL_CHECK_FRAMES: u64 = 4096;

/// Timeline values the exporter reads, captured once per export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub mode: PlaybackMode,
    pub sample_rate: u32,
    pub wav_duration: f64,
    pub show_interval: f64,
    pub animate_duration: f64,
}

impl From<&TimelineConfig> for ExportSettings {
    fn from(config: &TimelineConfig) -> Self {
        Self {
            mode: config.mode(),
            sample_rate: config.sample_rate(),
            wav_duration: config.wav_duration(),
            show_interval: config.show_interval(),
            animate_duration: config.animate_duration(),
        }
    }
}

impl ExportSettings {
    /// Length of the index window: the whole export in single mode, one
    /// segment in show mode.
    pub fn window_duration(&self) -> f64 {
        match self.mode {
            PlaybackMode::Single => self.wav_duration,
            PlaybackMode::Show => self.show_interval,
        }
    }
}

/// Sizes computed before anything is allocated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportPlan {
    pub frames: u64,
    pub data_bytes: u64,
    pub window_samples: u64,
}

impl ExportPlan {
    pub fn total_bytes(&self) -> u64 {
        self.data_bytes + WAV_HEADER_LEN as u64
    }
}

/// Validates the settings against the configuration bounds and checks the
/// result fits a 32-bit WAV container. Settings are public, so nothing set
/// through [`TimelineConfig`] is assumed here.
pub fn plan(settings: &ExportSettings) -> Result<ExportPlan> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&settings.sample_rate) {
        return Err(ScopeError::InvalidSampleRate {
            value: settings.sample_rate,
            min: MIN_SAMPLE_RATE,
            max: MAX_SAMPLE_RATE,
        });
    }
    check_range("wav duration", settings.wav_duration, MIN_WAV_DURATION, f64::MAX)?;
    check_range("animate duration", settings.animate_duration, 0.0, f64::MAX)?;
    if settings.mode == PlaybackMode::Show {
        check_range("show interval", settings.show_interval, MIN_SHOW_INTERVAL, f64::MAX)?;
    }

    let sample_rate = settings.sample_rate as f64;
    let frames = (sample_rate * settings.wav_duration).floor();
    let max_frames = MAX_DATA_BYTES / BYTES_PER_FRAME;
    if frames > max_frames as f64 {
        return Err(ScopeError::ExportSizeExceeded {
            requested_seconds: settings.wav_duration,
            max_seconds: (max_frames as f64 / sample_rate).floor(),
            limit_bytes: MAX_DATA_BYTES,
        });
    }
    let frames = frames as u64;

    Ok(ExportPlan {
        frames,
        data_bytes: frames * BYTES_PER_FRAME,
        window_samples: ((sample_rate * settings.window_duration()).floor() as u64).max(1),
    })
}

/// 16-bit stereo PCM; hound writes the canonical 44-byte header for it.
pub fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    }
}

#[inline]
fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Single-pass, single-threaded WAV renderer over one [`Scene`] snapshot.
#[derive(Debug, Clone)]
pub struct OfflineExporter {
    scene: Arc<Scene>,
    settings: ExportSettings,
    cancel: Option<Arc<AtomicBool>>,
}

impl OfflineExporter {
    /// Exports `scene` using its own timeline configuration.
    pub fn new(scene: Arc<Scene>) -> Self {
        let settings = ExportSettings::from(scene.config());
        Self {
            scene,
            settings,
            cancel: None,
        }
    }

    pub fn with_settings(mut self, settings: ExportSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Checks `flag` periodically; once it is set the export stops with
    /// [`ScopeError::ExportCancelled`] and produces no output.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn plan(&self) -> Result<ExportPlan> {
        plan(&self.settings)
    }

    /// Renders the complete WAV file into memory.
    pub fn render(&self) -> Result<Vec<u8>> {
        let plan = self.plan()?;
        let has_signal = match self.settings.mode {
            PlaybackMode::Single => self.scene.single().is_some(),
            PlaybackMode::Show => !self.scene.playlist().is_empty(),
        };
        if !has_signal {
            return Err(ScopeError::NoActiveSignal);
        }

        tracing::info!(
            mode = ?self.settings.mode,
            seconds = self.settings.wav_duration,
            sample_rate = self.settings.sample_rate,
            bytes = plan.total_bytes(),
            "exporting wav"
        );

        // plan() bounds the total by the 32-bit container limit.
        let mut cursor = Cursor::new(Vec::with_capacity(plan.total_bytes() as usize));
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, wav_spec(self.settings.sample_rate))?;
            for i in 0..plan.frames {
                if i % CANCEL_CHECK_FRAMES == 0 && self.is_cancelled() {
                    tracing::info!(frame = i, "export cancelled");
                    return Err(ScopeError::ExportCancelled);
                }
                let (left, right) = self.frame_at(i, &plan);
                writer.write_sample(quantize(left))?;
                writer.write_sample(quantize(right))?;
            }
            writer.finalize()?;
        }

        tracing::info!(frames = plan.frames, "export finished");
        Ok(cursor.into_inner())
    }

    /// Stereo frame `i` of the export, before quantisation.
    pub fn frame_at(&self, i: u64, plan: &ExportPlan) -> (f32, f32) {
        let settings = &self.settings;
        let sample_rate = settings.sample_rate as f64;
        let time = i as f64 / sample_rate;

        let position = match settings.mode {
            PlaybackMode::Single => time,
            PlaybackMode::Show => {
                let total = self.scene.playlist().len() as f64 * settings.show_interval;
                if total > 0.0 {
                    time % total
                } else {
                    0.0
                }
            }
        };
        let resolved = resolver::resolve(
            position,
            settings.mode,
            self.scene.playlist(),
            self.scene.single(),
            settings.show_interval,
            settings.animate_duration,
        );
        let Some(signal) = resolved.signal.filter(|signal| !signal.is_empty()) else {
            return (0.0, 0.0);
        };

        let local = i % plan.window_samples;
        let index = (local % signal.len() as u64) as usize;
        if (local as f64 / sample_rate) < settings.window_duration() * resolved.progress {
            signal.frame(index)
        } else {
            (0.0, 0.0)
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

/// Runs the export on a worker thread. The result arrives on the returned
/// channel once rendering finishes or fails.
pub fn spawn_export(exporter: OfflineExporter) -> Result<Receiver<Result<Vec<u8>>>> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("wav-export".into())
        .spawn(move || {
            // The caller may have hung up; the result is simply dropped then.
            let _ = sender.send(exporter.render());
        })?;
    Ok(receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConvertedSignal, ShowController};

    fn signal(values: &[f32]) -> ConvertedSignal {
        ConvertedSignal {
            signal_left: values.to_vec(),
            signal_right: values.iter().map(|v| -v).collect(),
            sample_rate: None,
            name: None,
        }
    }

    fn single(values: &[f32], sample_rate: u32, seconds: f64, animate: f64) -> Arc<Scene> {
        let mut controller = ShowController::new(TimelineConfig::default());
        controller.set_sample_rate(sample_rate);
        controller.set_wav_duration(seconds);
        controller.set_animate_duration(animate);
        controller.load_single(signal(values), "single").unwrap();
        controller.handle().scene()
    }

    fn sample_at(bytes: &[u8], frame: usize, channel: usize) -> i16 {
        let offset = WAV_HEADER_LEN + frame * 4 + channel * 2;
        i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    #[test]
    fn header_sizes_for_one_second_at_48k() {
        let scene = single(&[0.5; 10], 48_000, 1.0, 0.0);
        let bytes = OfflineExporter::new(scene).render().unwrap();

        let data_size = 48_000 * 2 * 2;
        assert_eq!(bytes.len(), 44 + data_size);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            36 + data_size as u32
        );
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(
            u32::from_le_bytes(bytes[40..44].try_into().unwrap()),
            data_size as u32
        );
    }

    #[test]
    fn header_layout_is_pcm_stereo_16_bit() {
        let scene = single(&[0.5; 10], 44_100, 1.0, 0.0);
        let bytes = OfflineExporter::new(scene).render().unwrap();
        let header = &bytes[..WAV_HEADER_LEN];
        assert_eq!(u32::from_le_bytes(header[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes([header[20], header[21]]), 1);
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 2);
        assert_eq!(u32::from_le_bytes(header[24..28].try_into().unwrap()), 44_100);
        assert_eq!(u32::from_le_bytes(header[28..32].try_into().unwrap()), 176_400);
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 4);
        assert_eq!(u16::from_le_bytes([header[34], header[35]]), 16);
    }

    #[test]
    fn rejects_exports_that_exceed_the_container() {
        let scene = single(&[0.5; 10], 48_000, 1.0, 0.0);
        let settings = ExportSettings {
            wav_duration: 1.0e7,
            ..ExportSettings::from(scene.config())
        };
        let err = OfflineExporter::new(scene)
            .with_settings(settings)
            .render()
            .unwrap_err();

        match err {
            ScopeError::ExportSizeExceeded {
                requested_seconds,
                max_seconds,
                limit_bytes,
            } => {
                assert_eq!(requested_seconds, 1.0e7);
                assert_eq!(limit_bytes, 0xFFFF_FFFF - 44);
                assert!(max_seconds * 48_000.0 * 4.0 <= limit_bytes as f64);
                assert!(max_seconds > 22_000.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn largest_fitting_export_plans_successfully() {
        let settings = ExportSettings {
            mode: PlaybackMode::Single,
            sample_rate: 48_000,
            wav_duration: 22_369.0,
            show_interval: 10.0,
            animate_duration: 0.0,
        };
        let plan = plan(&settings).unwrap();
        assert!(plan.data_bytes <= MAX_DATA_BYTES);

        let too_long = ExportSettings {
            wav_duration: 22_370.0,
            ..settings
        };
        assert!(matches!(
            super::plan(&too_long),
            Err(ScopeError::ExportSizeExceeded { .. })
        ));
    }

    #[test]
    fn settings_outside_the_configured_bounds_are_rejected() {
        let base = ExportSettings {
            mode: PlaybackMode::Single,
            sample_rate: 48_000,
            wav_duration: 2.0,
            show_interval: 10.0,
            animate_duration: 0.0,
        };

        let huge_rate = ExportSettings {
            sample_rate: 2_000_000_000,
            wav_duration: 1.0e-9,
            ..base.clone()
        };
        assert!(matches!(
            plan(&huge_rate),
            Err(ScopeError::InvalidSampleRate { value: 2_000_000_000, .. })
        ));
        let scene = single(&[0.5; 10], 48_000, 1.0, 0.0);
        let err = OfflineExporter::new(scene)
            .with_settings(huge_rate)
            .render()
            .unwrap_err();
        assert!(matches!(err, ScopeError::InvalidSampleRate { .. }));

        let short = ExportSettings {
            wav_duration: 0.5,
            ..base.clone()
        };
        assert!(matches!(
            plan(&short),
            Err(ScopeError::InvalidDuration { name: "wav duration", .. })
        ));

        let tight_show = ExportSettings {
            mode: PlaybackMode::Show,
            show_interval: 0.01,
            ..base.clone()
        };
        assert!(matches!(
            plan(&tight_show),
            Err(ScopeError::InvalidDuration { name: "show interval", .. })
        ));

        let undefined_animate = ExportSettings {
            animate_duration: f64::NAN,
            ..base
        };
        assert!(plan(&undefined_animate).is_err());
    }

    #[test]
    fn refuses_to_export_without_a_signal() {
        let controller = ShowController::new(TimelineConfig::default());
        let err = OfflineExporter::new(controller.handle().scene())
            .render()
            .unwrap_err();
        assert!(matches!(err, ScopeError::NoActiveSignal));
    }

    #[test]
    fn single_window_export_is_deterministic() {
        let values: Vec<f32> = (0..37).map(|i| (i as f32 * 0.37).sin()).collect();
        let scene = single(&values, 8_000, 1.0, 0.5);

        let first = OfflineExporter::new(scene.clone()).render().unwrap();
        let second = OfflineExporter::new(scene).render().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn single_mode_loops_signal_and_gates_by_progress() {
        // 1 s window at 8 kHz with a 0.5 s draw-in.
        let scene = single(&[0.5, 0.25, -0.5, 1.0], 8_000, 1.0, 0.5);
        let bytes = OfflineExporter::new(scene).render().unwrap();

        // t = 0: progress 0, nothing audible yet.
        assert_eq!(sample_at(&bytes, 0, 0), 0);
        // t = 0.25 s: progress 0.5, window * progress = 0.5 s > 0.25 s.
        assert_eq!(sample_at(&bytes, 2_000, 0), quantize(0.5));
        assert_eq!(sample_at(&bytes, 2_001, 0), quantize(0.25));
        assert_eq!(sample_at(&bytes, 2_001, 1), quantize(-0.25));
        assert_eq!(sample_at(&bytes, 2_003, 0), quantize(1.0));
        // Past the draw-in everything plays.
        assert_eq!(sample_at(&bytes, 7_998, 0), quantize(-0.5));
    }

    #[test]
    fn show_mode_switches_assets_per_segment_and_restarts_window() {
        let mut controller = ShowController::new(TimelineConfig::default());
        controller.set_mode(crate::PlaybackMode::Show);
        controller.set_sample_rate(8_000);
        controller.set_show_interval(0.5);
        controller.set_wav_duration(2.0);
        controller.add_to_playlist(signal(&[0.5, 0.5, 0.5]), "a").unwrap();
        controller.add_to_playlist(signal(&[-0.25, 0.75]), "b").unwrap();
        let bytes = OfflineExporter::new(controller.handle().scene())
            .render()
            .unwrap();

        assert_eq!(sample_at(&bytes, 0, 0), quantize(0.5));
        assert_eq!(sample_at(&bytes, 4_000, 0), quantize(-0.25));
        assert_eq!(sample_at(&bytes, 4_001, 0), quantize(0.75));
        // Second loop of the show starts over with the first asset.
        assert_eq!(sample_at(&bytes, 8_000, 0), quantize(0.5));
        assert_eq!(sample_at(&bytes, 12_001, 0), quantize(0.75));
    }

    #[test]
    fn out_of_range_samples_are_clamped_before_quantisation() {
        assert_eq!(quantize(3.0), 32767);
        assert_eq!(quantize(-3.0), -32767);
        assert_eq!(quantize(0.0), 0);
    }

    #[test]
    fn cancelled_export_produces_no_output() {
        let scene = single(&[0.5; 10], 48_000, 1.0, 0.0);
        let flag = Arc::new(AtomicBool::new(true));
        let err = OfflineExporter::new(scene)
            .with_cancel_flag(flag)
            .render()
            .unwrap_err();
        assert!(matches!(err, ScopeError::ExportCancelled));
    }

    #[test]
    fn exports_on_a_worker_thread() {
        let scene = single(&[0.1, 0.2], 8_000, 1.0, 0.0);
        let receiver = spawn_export(OfflineExporter::new(scene)).unwrap();
        let bytes = receiver.recv().unwrap().unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 8_000 * 4);
    }

    #[test]
    fn output_parses_as_wav() {
        let scene = single(&[0.5, -0.5], 8_000, 1.0, 0.0);
        let bytes = OfflineExporter::new(scene).render().unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 16_000);
    }
}
