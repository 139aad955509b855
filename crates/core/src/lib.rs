//! Core library for oscilloscope signal shows.
//!
//! Signals are pairs of equal-length left/right sample sequences, one per
//! visual asset. The crate turns them into a live audio stream that follows
//! an on-screen trace, and into an offline WAV file. Both paths, and the
//! visualiser, resolve the timeline through the same pure
//! [`resolver::resolve`] function so that what is previewed matches what is
//! exported.

pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod export;
pub mod render;
pub mod resolver;
pub mod scene;
pub mod timeline;

pub use assets::{ConvertedSignal, Signal, SignalStore};
pub use audio::{AudioEngine, GainStage, OutputBackend, RealtimeRenderer, SessionStats, ThreadedBackend};
pub use config::{AppConfig, AudioConfig, PlaybackMode, TimelineConfig};
pub use error::{Result, ScopeError};
pub use export::{spawn_export, ExportPlan, ExportSettings, OfflineExporter};
pub use render::{Canvas, TraceFrame, TraceSink, Visualizer};
pub use resolver::{resolve, ResolvedFrame};
pub use scene::{Scene, SceneHandle, ShowController};
pub use timeline::{PlayPosition, PlaybackClock, TickTask};
