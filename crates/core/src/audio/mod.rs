use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{AudioConfig, Result, SceneHandle};

/// Interleaved stereo output.
pub const CHANNELS: usize = 2;

/// Callback handed to an [`OutputBackend`]. Fills one interleaved stereo
/// block per invocation.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Seam to the platform audio subsystem.
pub trait OutputBackend: Send {
    /// Starts invoking `callback` with blocks of `config.block_size` frames.
    fn open(&mut self, config: &AudioConfig, callback: RenderCallback) -> Result<()>;

    /// Stops the callback. Must not return while an invocation is in flight,
    /// and no invocation may follow.
    fn close(&mut self);
}

/// Scalar gain applied after the scan loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: if gain.is_finite() {
                gain.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    #[inline]
    pub fn process(&self, block: &mut [f32]) {
        if self.gain == 1.0 {
            return;
        }
        for sample in block {
            *sample *= self.gain;
        }
    }
}

/// Counters published by the renderer after every block.
#[derive(Debug, Default)]
pub struct SessionStats {
    blocks: AtomicU64,
    scan_cursor: AtomicU64,
}

impl SessionStats {
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Acquire)
    }

    pub fn scan_cursor(&self) -> u64 {
        self.scan_cursor.load(Ordering::Acquire)
    }
}

/// Fills output blocks from the active signal.
///
/// A scan cursor advances by one for every output frame, whatever signal is
/// active, and is never reset when the active signal changes. Each signal
/// therefore repeats at `sample_rate / signal.len()` Hz. Only samples below
/// `floor(len * progress)` are audible; the rest of each cycle is silent.
pub struct RealtimeRenderer {
    handle: Arc<SceneHandle>,
    scan_cursor: u64,
    stats: Arc<SessionStats>,
}

impl RealtimeRenderer {
    pub fn new(handle: Arc<SceneHandle>) -> Self {
        Self {
            handle,
            scan_cursor: 0,
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn scan_cursor(&self) -> u64 {
        self.scan_cursor
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    /// Renders one interleaved stereo block. Never allocates, locks or fails;
    /// anything unexpected becomes silence.
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / CHANNELS;
        let scene = self.handle.snapshot();
        let resolved = scene.resolve(self.handle.position());

        match resolved.signal.filter(|signal| !signal.is_empty()) {
            None => {
                out.fill(0.0);
                self.scan_cursor = self.scan_cursor.wrapping_add(frames as u64);
            }
            Some(signal) => {
                let len = signal.len() as u64;
                let visible = resolved.visible_len();
                for frame in out.chunks_exact_mut(CHANNELS) {
                    let index = (self.scan_cursor % len) as usize;
                    let (left, right) = if index < visible {
                        signal.frame(index)
                    } else {
                        (0.0, 0.0)
                    };
                    frame[0] = left;
                    frame[1] = right;
                    self.scan_cursor = self.scan_cursor.wrapping_add(1);
                }
                out[frames * CHANNELS..].fill(0.0);
            }
        }

        GainStage::new(scene.config().gain()).process(out);

        self.stats.blocks.fetch_add(1, Ordering::AcqRel);
        self.stats
            .scan_cursor
            .store(self.scan_cursor, Ordering::Release);
    }
}

impl std::fmt::Debug for RealtimeRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeRenderer")
            .field("scan_cursor", &self.scan_cursor)
            .finish()
    }
}

/// Backend that calls the render callback from its own thread, one block at
/// a time. When paced it keeps to the real-time block cadence; otherwise it
/// renders as fast as it can.
#[derive(Debug, Default)]
pub struct ThreadedBackend {
    paced: bool,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedBackend {
    /// Paced to the sample clock, like a sound card.
    pub fn realtime() -> Self {
        let mut backend = Self::default();
        backend.paced = true;
        backend
    }

    pub fn unpaced() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.worker.is_some()
    }
}

impl OutputBackend for ThreadedBackend {
    fn open(&mut self, config: &AudioConfig, mut callback: RenderCallback) -> Result<()> {
        self.close();

        let block_size = config.block_size.max(1);
        let block_period =
            Duration::from_secs_f64(block_size as f64 / config.sample_rate.max(1) as f64);
        let paced = self.paced;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let worker = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let mut buffer = vec![0.0_f32; block_size * CHANNELS];
                let mut deadline = Instant::now();
                while !flag.load(Ordering::Acquire) {
                    callback(&mut buffer);
                    if paced {
                        deadline += block_period;
                        let now = Instant::now();
                        if deadline > now {
                            thread::park_timeout(deadline - now);
                        } else {
                            deadline = now;
                        }
                    }
                }
            })?;

        self.stop = stop;
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        worker.thread().unpark();
        if worker.join().is_err() {
            tracing::warn!("audio output worker panicked");
        }
    }
}

impl Drop for ThreadedBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// High level audio engine façade. Each [`AudioEngine::start`] begins a new
/// session with a fresh renderer whose scan cursor starts at zero.
#[derive(Debug)]
pub struct AudioEngine<B: OutputBackend> {
    config: AudioConfig,
    handle: Arc<SceneHandle>,
    backend: B,
    stats: Option<Arc<SessionStats>>,
}

impl<B: OutputBackend> AudioEngine<B> {
    pub fn new(config: AudioConfig, handle: Arc<SceneHandle>, backend: B) -> Self {
        Self {
            config,
            handle,
            backend,
            stats: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_some()
    }

    /// Counters of the running session, if any.
    pub fn stats(&self) -> Option<Arc<SessionStats>> {
        self.stats.clone()
    }

    /// Starts a new playback session. A running session is stopped first.
    pub fn start(&mut self) -> Result<Arc<SessionStats>> {
        self.stop();

        let mut renderer = RealtimeRenderer::new(self.handle.clone());
        let stats = renderer.stats();
        self.backend
            .open(&self.config, Box::new(move |out: &mut [f32]| renderer.render(out)))?;

        tracing::info!(
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            "audio session started"
        );
        self.stats = Some(stats.clone());
        Ok(stats)
    }

    /// Tears the callback down. Returns only once no further invocation can
    /// happen.
    pub fn stop(&mut self) {
        if let Some(stats) = self.stats.take() {
            self.backend.close();
            tracing::info!(
                blocks = stats.blocks(),
                scan_cursor = stats.scan_cursor(),
                "audio session stopped"
            );
        }
    }
}

impl<B: OutputBackend> Drop for AudioEngine<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConvertedSignal, PlaybackMode, ShowController, TimelineConfig};

    fn ramp(len: usize) -> ConvertedSignal {
        ConvertedSignal {
            signal_left: (0..len).map(|i| i as f32 / len as f32).collect(),
            signal_right: (0..len).map(|i| -(i as f32) / len as f32).collect(),
            sample_rate: None,
            name: None,
        }
    }

    fn single(len: usize, animate: f64) -> ShowController {
        let mut controller = ShowController::new(TimelineConfig::default());
        controller.set_animate_duration(animate);
        controller.load_single(ramp(len), "ramp").unwrap();
        controller
    }

    #[test]
    fn silence_without_signal_still_advances_cursor() {
        let controller = ShowController::new(TimelineConfig::default());
        let mut renderer = RealtimeRenderer::new(controller.handle());
        let mut block = vec![1.0; 64 * CHANNELS];

        renderer.render(&mut block);
        renderer.render(&mut block);

        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(renderer.scan_cursor(), 128);
    }

    #[test]
    fn cursor_advances_by_block_size_regardless_of_signal() {
        let mut controller = ShowController::new(TimelineConfig::default());
        controller.set_mode(PlaybackMode::Show);
        controller.set_show_interval(1.0);
        controller.add_to_playlist(ramp(7), "a").unwrap();
        controller.add_to_playlist(ramp(13), "b").unwrap();
        let handle = controller.handle();
        let mut renderer = RealtimeRenderer::new(handle.clone());
        let mut block = vec![0.0; 100 * CHANNELS];

        for step in 0..6 {
            handle.seek(step as f64 * 0.5);
            renderer.render(&mut block);
            assert_eq!(renderer.scan_cursor(), (step + 1) * 100);
        }
    }

    #[test]
    fn scan_continues_across_signal_changes() {
        let mut controller = ShowController::new(TimelineConfig::default());
        controller.set_mode(PlaybackMode::Show);
        controller.set_show_interval(1.0);
        controller.add_to_playlist(ramp(10), "a").unwrap();
        controller.add_to_playlist(ramp(4), "b").unwrap();
        let handle = controller.handle();
        let mut renderer = RealtimeRenderer::new(handle.clone());
        let mut block = vec![0.0; 3 * CHANNELS];

        renderer.render(&mut block);
        handle.seek(1.5);
        renderer.render(&mut block);

        // cursor 3..6 over a 4-sample signal: indices 3, 0, 1
        assert_eq!(block[0], 0.75);
        assert_eq!(block[2], 0.0);
        assert_eq!(block[4], 0.25);
    }

    #[test]
    fn gating_boundary_is_floor_of_len_times_progress() {
        let controller = single(10, 2.0);
        let handle = controller.handle();
        handle.seek(1.0);
        let mut renderer = RealtimeRenderer::new(handle);
        let mut block = vec![0.0; 10 * CHANNELS];

        renderer.render(&mut block);

        for index in 0..10 {
            let left = block[index * CHANNELS];
            if index < 5 {
                assert_eq!(left, index as f32 / 10.0);
            } else {
                assert_eq!(left, 0.0, "sample {index} should be gated");
            }
        }
    }

    #[test]
    fn gain_is_applied_after_scanning() {
        let mut controller = single(4, 0.0);
        controller.set_gain(0.5);
        let mut renderer = RealtimeRenderer::new(controller.handle());
        let mut block = vec![0.0; 4 * CHANNELS];

        renderer.render(&mut block);

        assert_eq!(block[2], 0.125);
        assert_eq!(block[3], -0.125);
    }

    #[test]
    fn playlist_replacement_between_blocks_is_tolerated() {
        let mut controller = ShowController::new(TimelineConfig::default());
        controller.set_mode(PlaybackMode::Show);
        controller.add_to_playlist(ramp(8), "a").unwrap();
        let mut renderer = RealtimeRenderer::new(controller.handle());
        let mut block = vec![0.0; 32 * CHANNELS];

        renderer.render(&mut block);
        controller.clear_playlist();
        renderer.render(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));

        controller.add_to_playlist(ramp(3), "b").unwrap();
        renderer.render(&mut block);
        assert_eq!(renderer.scan_cursor(), 96);
    }

    #[test]
    fn engine_sessions_start_from_zero_and_stop_synchronously() {
        let controller = single(16, 0.0);
        let config = AudioConfig {
            sample_rate: 48_000,
            block_size: 32,
        };
        let mut engine = AudioEngine::new(config, controller.handle(), ThreadedBackend::unpaced());

        let first = engine.start().unwrap();
        while first.blocks() < 4 {
            thread::yield_now();
        }
        engine.stop();
        let frozen = first.blocks();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(first.blocks(), frozen);
        assert_eq!(first.scan_cursor(), frozen * 32);

        let second = engine.start().unwrap();
        while second.blocks() < 2 {
            thread::yield_now();
        }
        engine.stop();
        assert_eq!(second.scan_cursor(), second.blocks() * 32);
        assert!(!engine.is_running());
    }

    #[test]
    fn realtime_backend_paces_blocks_and_closes() {
        let config = AudioConfig {
            sample_rate: 48_000,
            block_size: 480,
        };
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let mut backend = ThreadedBackend::realtime();

        backend
            .open(
                &config,
                Box::new(move |out: &mut [f32]| {
                    assert_eq!(out.len(), 480 * CHANNELS);
                    counter.fetch_add(1, Ordering::AcqRel);
                }),
            )
            .unwrap();
        assert!(backend.is_open());
        thread::sleep(Duration::from_millis(50));
        backend.close();

        // 10 ms blocks: a free-running loop would have produced thousands.
        let produced = calls.load(Ordering::Acquire);
        assert!(produced >= 1 && produced < 50, "{produced} blocks");
        assert!(!backend.is_open());
    }
}
