use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use oscshow_core::{
    spawn_export, AppConfig, AudioConfig, AudioEngine, Canvas, ConvertedSignal, OfflineExporter,
    OutputBackend, PlaybackClock, PlaybackMode, ScopeError, ShowController, ThreadedBackend,
    TickTask, TraceSink, Visualizer,
};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "device")]
mod device;
mod watch;

use watch::{input_files, InputWatcher};

/// How often `preview --watch` looks for changed inputs.
const WATCH_PERIOD: Duration = Duration::from_millis(500);

fn main() -> oscshow_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            inputs,
            output,
            duration,
            timeline,
        } => run_export(&inputs, &output, duration, &timeline),
        Commands::Preview {
            inputs,
            seconds,
            ascii,
            play,
            watch,
            timeline,
        } => {
            let options = PreviewOptions {
                seconds,
                ascii,
                watch,
            };
            run_preview(&inputs, play, &options, &timeline)
        }
        Commands::Inspect {
            inputs,
            at,
            timeline,
        } => run_inspect(&inputs, at, &timeline),
    }
}

fn run_export(
    inputs: &[PathBuf],
    output: &Path,
    duration: Option<f64>,
    timeline: &TimelineArgs,
) -> oscshow_core::Result<()> {
    let (mut controller, _) = build_controller(inputs, timeline)?;
    if let Some(seconds) = duration {
        controller.set_wav_duration(seconds);
    }
    tracing::info!(?output, "rendering export");

    let receiver = spawn_export(OfflineExporter::new(controller.handle().scene()))?;
    let bytes = receiver
        .recv()
        .map_err(|_| ScopeError::msg("export worker exited without a result"))??;
    std::fs::write(output, &bytes)?;

    tracing::info!(?output, bytes = bytes.len(), "saved wav");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct PreviewOptions {
    seconds: f64,
    ascii: bool,
    watch: bool,
}

fn run_preview(
    inputs: &[PathBuf],
    play: bool,
    options: &PreviewOptions,
    timeline: &TimelineArgs,
) -> oscshow_core::Result<()> {
    let (controller, audio) = build_controller(inputs, timeline)?;
    if play {
        #[cfg(feature = "device")]
        {
            let backend = device::DeviceBackend::new();
            return run_session(controller, audio, backend, inputs, options);
        }
        #[cfg(not(feature = "device"))]
        {
            return Err(ScopeError::msg(
                "this build has no sound card output; rebuild with `--features device`",
            ));
        }
    }
    run_session(controller, audio, ThreadedBackend::realtime(), inputs, options)
}

/// Plays the timeline through `backend` while a tick task advances the
/// clock and traces each display refresh.
fn run_session<B: OutputBackend>(
    mut controller: ShowController,
    audio: AudioConfig,
    backend: B,
    inputs: &[PathBuf],
    options: &PreviewOptions,
) -> oscshow_core::Result<()> {
    let handle = controller.handle();
    tracing::info!(
        seconds = options.seconds,
        mode = ?controller.config().mode(),
        watch = options.watch,
        "starting preview"
    );

    let mut engine = AudioEngine::new(audio, handle.clone(), backend);
    let stats = engine.start()?;

    let raster = Arc::new(Mutex::new(AsciiRaster::new(64, 32)));
    let mut clock = PlaybackClock::with_position(handle.shared_position());
    clock.start(Instant::now());
    let mut visualizer = Visualizer::new(Canvas::new(64.0, 32.0));
    let tick_handle = handle.clone();
    let tick_raster = raster.clone();
    let mut last_index = None;
    let mut last_name = String::new();

    let mut ticker = TickTask::spawn(oscshow_core::timeline::DEFAULT_TICK_PERIOD, move |now| {
        let loop_length = tick_handle.snapshot().loop_length();
        clock.tick(now, loop_length);

        let Ok(mut raster) = tick_raster.lock() else {
            return;
        };
        let frame = visualizer.draw(&tick_handle, &mut *raster);
        let name = frame.signal.as_ref().map(|s| s.name().to_string());
        if frame.index != last_index || name.as_deref().unwrap_or("") != last_name {
            tracing::info!(
                asset = name.as_deref().unwrap_or("<none>"),
                index = ?frame.index,
                position = tick_handle.position(),
                "now playing"
            );
            last_index = frame.index;
            last_name = name.unwrap_or_default();
        }
    })?;

    let seconds = if options.seconds.is_finite() {
        options.seconds.max(0.0)
    } else {
        0.0
    };
    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    let mut watcher = options.watch.then(|| InputWatcher::new(inputs));
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let Some(watcher) = watcher.as_mut() else {
            thread::sleep(deadline - now);
            break;
        };
        thread::sleep(WATCH_PERIOD.min(deadline - now));
        if watcher.poll() {
            // A failed reload keeps the current signals playing.
            if let Err(err) = reload(&mut controller, inputs) {
                tracing::warn!(%err, "reload failed, keeping previous signals");
            }
        }
    }

    ticker.stop();
    engine.stop();
    tracing::info!(
        blocks = stats.blocks(),
        scan_cursor = stats.scan_cursor(),
        position = handle.position(),
        "preview finished"
    );

    if options.ascii {
        let raster = raster
            .lock()
            .map_err(|_| ScopeError::msg("trace raster has been poisoned"))?;
        println!("{}", raster.render());
    }
    Ok(())
}

/// Loads the inputs again into the running controller. A new single asset
/// restarts the draw-in; a show keeps its position.
fn reload(controller: &mut ShowController, inputs: &[PathBuf]) -> oscshow_core::Result<()> {
    let assets = load_inputs(inputs)?;
    tracing::info!(count = assets.len(), "inputs changed, reloading");
    match controller.config().mode() {
        PlaybackMode::Single => {
            if let Some((name, converted)) = assets.into_iter().next() {
                controller.load_single(converted, &name)?;
            }
        }
        PlaybackMode::Show => {
            controller.replace_playlist(
                assets
                    .into_iter()
                    .map(|(name, converted)| (converted, name)),
            )?;
        }
    }
    Ok(())
}

fn run_inspect(inputs: &[PathBuf], at: f64, timeline: &TimelineArgs) -> oscshow_core::Result<()> {
    let (controller, _) = build_controller(inputs, timeline)?;
    controller.seek(at);
    let handle = controller.handle();
    let scene = handle.scene();
    let frame = scene.resolve(handle.position());

    match frame.signal {
        Some(signal) => println!(
            "position {:.3}s: {} (index {}), progress {:.3}, {} of {} samples visible",
            handle.position(),
            signal.name(),
            frame
                .index
                .map(|index| index.to_string())
                .unwrap_or_else(|| "-".into()),
            frame.progress,
            frame.visible_len(),
            signal.len()
        ),
        None => println!("position {:.3}s: no active signal", handle.position()),
    }
    Ok(())
}

/// Loads the inputs and applies configuration in order: config file, then
/// command line overrides. Without an explicit mode, one input plays as a
/// single asset and several inputs play as a show.
fn build_controller(
    inputs: &[PathBuf],
    args: &TimelineArgs,
) -> oscshow_core::Result<(ShowController, AudioConfig)> {
    let file_config = match &args.config {
        Some(path) => Some(AppConfig::from_json(&std::fs::read_to_string(path)?)?),
        None => None,
    };
    let assets = load_inputs(inputs)?;

    let mode = args
        .mode
        .map(PlaybackMode::from)
        .or(file_config.as_ref().map(|config| config.timeline.mode()))
        .unwrap_or(if assets.len() == 1 {
            PlaybackMode::Single
        } else {
            PlaybackMode::Show
        });

    let app_config = file_config.unwrap_or_default();
    let mut controller = ShowController::new(app_config.timeline.clone());
    controller.set_mode(mode);
    if let Some(interval) = args.interval {
        controller.set_show_interval(interval);
    }
    if let Some(animate) = args.animate {
        controller.set_animate_duration(animate);
    }
    if let Some(sample_rate) = args.sample_rate {
        controller.set_sample_rate(sample_rate);
    }
    if let Some(gain) = args.gain {
        controller.set_gain(gain);
    }

    let sample_rate = controller.config().sample_rate();
    for (name, converted) in &assets {
        if let Some(rate) = converted.sample_rate.filter(|rate| *rate != sample_rate) {
            tracing::warn!(%name, rate, sample_rate, "signal was converted for a different sample rate");
        }
    }

    match mode {
        PlaybackMode::Single => {
            if assets.len() > 1 {
                tracing::warn!(count = assets.len(), "single mode plays only the first input");
            }
            if let Some((name, converted)) = assets.into_iter().next() {
                controller.load_single(converted, &name)?;
            }
        }
        PlaybackMode::Show => {
            for (name, converted) in assets {
                controller.add_to_playlist(converted, &name)?;
            }
        }
    }

    let audio = AudioConfig {
        sample_rate,
        block_size: app_config.audio.block_size,
    };
    Ok((controller, audio))
}

/// Reads converter JSON files, named after their file stem.
fn load_inputs(inputs: &[PathBuf]) -> oscshow_core::Result<Vec<(String, ConvertedSignal)>> {
    input_files(inputs)?
        .iter()
        .map(|path| -> oscshow_core::Result<(String, ConvertedSignal)> {
            let converted = ConvertedSignal::from_json(&std::fs::read_to_string(path)?)?;
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            tracing::debug!(%name, ?path, "loaded signal file");
            Ok((name, converted))
        })
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Character grid used as a headless trace display.
#[derive(Debug)]
struct AsciiRaster {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

impl AsciiRaster {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![b' '; width * height],
        }
    }

    fn render(&self) -> String {
        self.cells
            .chunks(self.width)
            .map(|row| String::from_utf8_lossy(row).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TraceSink for AsciiRaster {
    fn clear(&mut self) {
        self.cells.fill(b' ');
    }

    fn polyline(&mut self, points: &[(f32, f32)]) {
        for &(x, y) in points {
            let (col, row) = (x.round(), y.round());
            if col >= 0.0 && row >= 0.0 && (col as usize) < self.width && (row as usize) < self.height
            {
                self.cells[row as usize * self.width + col as usize] = b'*';
            }
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Oscilloscope show exporter and previewer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render the timeline to a 16-bit stereo WAV file.
    Export {
        /// Converter JSON files, or directories of them.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output WAV path.
        #[arg(short, long)]
        output: PathBuf,
        /// Length of the export in seconds.
        #[arg(short, long)]
        duration: Option<f64>,
        #[command(flatten)]
        timeline: TimelineArgs,
    },
    /// Play the timeline through a real-time session.
    Preview {
        /// Converter JSON files, or directories of them.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// How long to run the session.
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Print the last traced frame as ASCII art.
        #[arg(long)]
        ascii: bool,
        /// Play through the default sound card instead of a silent clock.
        #[arg(long)]
        play: bool,
        /// Reload the inputs whenever they change on disk.
        #[arg(long)]
        watch: bool,
        #[command(flatten)]
        timeline: TimelineArgs,
    },
    /// Show which asset and how much of it is visible at a position.
    Inspect {
        /// Converter JSON files, or directories of them.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Play position in seconds.
        #[arg(long)]
        at: f64,
        #[command(flatten)]
        timeline: TimelineArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct TimelineArgs {
    /// JSON file with `timeline` and `audio` sections.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Playback mode; defaults to single for one input and show otherwise.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Seconds per show segment.
    #[arg(long)]
    interval: Option<f64>,
    /// Draw-in duration in seconds.
    #[arg(long)]
    animate: Option<f64>,
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Output gain between 0 and 1; also scales the trace.
    #[arg(long)]
    gain: Option<f32>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Single,
    Show,
}

impl From<ModeArg> for PlaybackMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Single => PlaybackMode::Single,
            ModeArg::Show => PlaybackMode::Show,
        }
    }
}
