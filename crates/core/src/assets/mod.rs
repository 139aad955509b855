use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Result, ScopeError};

/// Converter output for a single asset, as produced by the SVG conversion
/// service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertedSignal {
    pub signal_left: Vec<f32>,
    pub signal_right: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConvertedSignal {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One asset's X/Y trace. Immutable once accepted by the [`SignalStore`].
#[derive(Debug, PartialEq)]
pub struct Signal {
    id: u64,
    name: String,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Signal {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    /// Number of stereo frames. Always non-zero.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Frame `index` with both channels clamped to `[-1, 1]`.
    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        (
            self.left[index].clamp(-1.0, 1.0),
            self.right[index].clamp(-1.0, 1.0),
        )
    }
}

/// Holds the single asset and the show playlist. Signals are shared behind
/// [`Arc`] so renderers never copy sample data.
#[derive(Debug, Default)]
pub struct SignalStore {
    single: Option<Arc<Signal>>,
    playlist: Vec<Arc<Signal>>,
    next_id: u64,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates converter output and turns it into a [`Signal`]. Nothing is
    /// stored; callers decide whether it becomes the single asset or a
    /// playlist entry.
    pub fn accept(
        &mut self,
        name: impl Into<String>,
        left: Vec<f32>,
        right: Vec<f32>,
    ) -> Result<Arc<Signal>> {
        let name = name.into();
        if let Err(err) = validate(&left, &right) {
            tracing::warn!(%name, %err, "rejecting converted signal");
            return Err(err);
        }

        self.next_id += 1;
        let signal = Signal {
            id: self.next_id,
            name,
            left,
            right,
        };
        tracing::debug!(id = signal.id, name = %signal.name, frames = signal.len(), "accepted signal");
        Ok(Arc::new(signal))
    }

    /// Accepts a converter record, falling back to `fallback_name` when the
    /// record carries no name of its own.
    pub fn accept_converted(
        &mut self,
        converted: ConvertedSignal,
        fallback_name: &str,
    ) -> Result<Arc<Signal>> {
        let name = converted
            .name
            .unwrap_or_else(|| fallback_name.to_string());
        self.accept(name, converted.signal_left, converted.signal_right)
    }

    pub fn single(&self) -> Option<&Arc<Signal>> {
        self.single.as_ref()
    }

    pub fn set_single(&mut self, signal: Arc<Signal>) {
        self.single = Some(signal);
    }

    pub fn clear_single(&mut self) {
        self.single = None;
    }

    pub fn playlist(&self) -> &[Arc<Signal>] {
        &self.playlist
    }

    pub fn push(&mut self, signal: Arc<Signal>) {
        self.playlist.push(signal);
    }

    /// Removes the playlist entry with the given id, returning it if present.
    pub fn remove(&mut self, id: u64) -> Option<Arc<Signal>> {
        let position = self.playlist.iter().position(|signal| signal.id() == id)?;
        Some(self.playlist.remove(position))
    }

    /// Moves the entry at `from` so that it ends up at index `to`.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.playlist.len();
        if from >= len || to >= len {
            return Err(ScopeError::msg(format!(
                "cannot move playlist entry {from} to {to}: playlist has {len} entries"
            )));
        }
        let signal = self.playlist.remove(from);
        self.playlist.insert(to, signal);
        Ok(())
    }

    pub fn replace_playlist(&mut self, playlist: Vec<Arc<Signal>>) {
        self.playlist = playlist;
    }

    pub fn clear_playlist(&mut self) {
        self.playlist.clear();
    }
}

fn validate(left: &[f32], right: &[f32]) -> Result<()> {
    if left.is_empty() || right.is_empty() {
        return Err(ScopeError::malformed("signal has no samples"));
    }
    if left.len() != right.len() {
        return Err(ScopeError::malformed(format!(
            "left has {} samples but right has {}",
            left.len(),
            right.len()
        )));
    }
    let non_finite = left
        .iter()
        .chain(right.iter())
        .position(|sample| !sample.is_finite());
    if let Some(index) = non_finite {
        return Err(ScopeError::malformed(format!(
            "non-finite sample at position {index}"
        )));
    }
    Ok(())
}
