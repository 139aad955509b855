use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};

use crate::{
    resolver::{self, ResolvedFrame},
    ConvertedSignal, PlayPosition, PlaybackMode, Result, Signal, SignalStore, TimelineConfig,
};

/// Immutable bundle of everything the resolver needs: the loaded signals and
/// the timeline parameters. Readers always see one consistent snapshot; a
/// playlist edit produces a new scene rather than mutating this one.
#[derive(Debug, Clone)]
pub struct Scene {
    single: Option<Arc<Signal>>,
    playlist: Arc<[Arc<Signal>]>,
    config: TimelineConfig,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            single: None,
            playlist: Arc::from(Vec::new()),
            config: TimelineConfig::default(),
        }
    }
}

impl Scene {
    pub fn new(store: &SignalStore, config: &TimelineConfig) -> Self {
        Self {
            single: store.single().cloned(),
            playlist: store.playlist().iter().cloned().collect(),
            config: config.clone(),
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.config.mode()
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    pub fn single(&self) -> Option<&Arc<Signal>> {
        self.single.as_ref()
    }

    pub fn playlist(&self) -> &[Arc<Signal>] {
        &self.playlist
    }

    /// Full show duration (`playlist.len() * show_interval`). Zero in single
    /// mode and for an empty playlist, meaning the position never wraps.
    pub fn loop_length(&self) -> f64 {
        match self.mode() {
            PlaybackMode::Single => 0.0,
            PlaybackMode::Show => self.playlist.len() as f64 * self.config.show_interval(),
        }
    }

    /// True when the active mode has something to play.
    pub fn has_signal(&self) -> bool {
        match self.mode() {
            PlaybackMode::Single => self.single.is_some(),
            PlaybackMode::Show => !self.playlist.is_empty(),
        }
    }

    pub fn resolve(&self, position: f64) -> ResolvedFrame<'_> {
        resolver::resolve(
            position,
            self.mode(),
            &self.playlist,
            self.single.as_ref(),
            self.config.show_interval(),
            self.config.animate_duration(),
        )
    }
}

/// Lock-free shared state read by the audio callback and the timeline tick.
#[derive(Debug)]
pub struct SceneHandle {
    scene: ArcSwap<Scene>,
    position: Arc<PlayPosition>,
}

impl Default for SceneHandle {
    fn default() -> Self {
        Self::new(Scene::default())
    }
}

impl SceneHandle {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene: ArcSwap::from_pointee(scene),
            position: Arc::new(PlayPosition::default()),
        }
    }

    /// Current scene. Cheap and non-blocking; safe inside the audio callback.
    #[inline]
    pub fn snapshot(&self) -> Guard<Arc<Scene>> {
        self.scene.load()
    }

    pub fn scene(&self) -> Arc<Scene> {
        self.scene.load_full()
    }

    /// Installs `scene` and returns the one it replaces.
    pub fn publish(&self, scene: Scene) -> Arc<Scene> {
        self.scene.swap(Arc::new(scene))
    }

    #[inline]
    pub fn position(&self) -> f64 {
        self.position.get()
    }

    pub fn shared_position(&self) -> Arc<PlayPosition> {
        self.position.clone()
    }

    pub fn seek(&self, position: f64) {
        self.position.set(position);
    }

    pub fn reset_position(&self) {
        self.position.set(0.0);
    }
}

/// Owns the signal store and timeline parameters and republishes a fresh
/// [`Scene`] after every change. Applies the position reset rules: a mode
/// switch, a newly loaded single asset and an explicit seek all move the
/// play position; playlist edits do not.
///
/// The previously published scene is held until the next publish, so a
/// reader that loaded it just before a swap never drops the last reference
/// on the audio thread.
#[derive(Debug)]
pub struct ShowController {
    store: SignalStore,
    config: TimelineConfig,
    handle: Arc<SceneHandle>,
    _retired: Option<Arc<Scene>>,
}

impl ShowController {
    pub fn new(config: TimelineConfig) -> Self {
        let store = SignalStore::new();
        let handle = Arc::new(SceneHandle::new(Scene::new(&store, &config)));
        Self {
            store,
            config,
            handle,
            _retired: None,
        }
    }

    pub fn handle(&self) -> Arc<SceneHandle> {
        self.handle.clone()
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Accepts converter output as the single asset.
    pub fn load_single(&mut self, converted: ConvertedSignal, name: &str) -> Result<Arc<Signal>> {
        let signal = self.store.accept_converted(converted, name)?;
        tracing::info!(name = signal.name(), frames = signal.len(), "loaded single asset");
        self.store.set_single(signal.clone());
        self.handle.reset_position();
        self.publish();
        Ok(signal)
    }

    /// Accepts converter output and appends it to the playlist.
    pub fn add_to_playlist(
        &mut self,
        converted: ConvertedSignal,
        name: &str,
    ) -> Result<Arc<Signal>> {
        let signal = self.store.accept_converted(converted, name)?;
        tracing::info!(
            name = signal.name(),
            index = self.store.playlist().len(),
            "added asset to playlist"
        );
        self.store.push(signal.clone());
        self.publish();
        Ok(signal)
    }

    pub fn remove(&mut self, id: u64) -> Option<Arc<Signal>> {
        let removed = self.store.remove(id);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        self.store.move_item(from, to)?;
        self.publish();
        Ok(())
    }

    /// Swaps in a whole new playlist in one publish. Every entry is
    /// validated first; on error the current playlist stays in place.
    pub fn replace_playlist<I>(&mut self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = (ConvertedSignal, String)>,
    {
        let mut playlist = Vec::new();
        for (converted, name) in items {
            playlist.push(self.store.accept_converted(converted, &name)?);
        }
        let count = playlist.len();
        tracing::info!(count, "replaced playlist");
        self.store.replace_playlist(playlist);
        self.publish();
        Ok(count)
    }

    pub fn clear_playlist(&mut self) {
        self.store.clear_playlist();
        self.publish();
    }

    pub fn set_mode(&mut self, mode: PlaybackMode) {
        if self.config.mode() == mode {
            return;
        }
        tracing::info!(?mode, "switching playback mode");
        self.config.set_mode(mode);
        self.handle.reset_position();
        self.publish();
    }

    pub fn set_show_interval(&mut self, seconds: f64) -> f64 {
        let applied = self.config.set_show_interval(seconds);
        self.publish();
        applied
    }

    pub fn set_animate_duration(&mut self, seconds: f64) -> f64 {
        let applied = self.config.set_animate_duration(seconds);
        self.publish();
        applied
    }

    pub fn set_wav_duration(&mut self, seconds: f64) -> f64 {
        let applied = self.config.set_wav_duration(seconds);
        self.publish();
        applied
    }

    pub fn set_gain(&mut self, gain: f32) -> f32 {
        let applied = self.config.set_gain(gain);
        self.publish();
        applied
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> u32 {
        let applied = self.config.set_sample_rate(sample_rate);
        self.publish();
        applied
    }

    /// Replaces every timeline parameter, validating each one.
    pub fn apply_config(&mut self, config: &TimelineConfig) {
        let mode_changed = self.config.mode() != config.mode();
        self.config.apply(config);
        if mode_changed {
            self.handle.reset_position();
        }
        self.publish();
    }

    pub fn seek(&self, position: f64) {
        self.handle.seek(position);
    }

    fn publish(&mut self) {
        let previous = self.handle.publish(Scene::new(&self.store, &self.config));
        self._retired = Some(previous);
    }
}
