use std::sync::Arc;

use crate::{Scene, SceneHandle, Signal};

/// Output surface size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: f32,
    pub height: f32,
}

impl Canvas {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width * 0.5, self.height * 0.5)
    }
}

/// Drawing backend for the trace.
pub trait TraceSink {
    fn clear(&mut self);
    fn polyline(&mut self, points: &[(f32, f32)]);
}

/// What to draw for one display refresh.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub signal: Option<Arc<Signal>>,
    pub index: Option<usize>,
    pub progress: f64,
    pub visible_len: usize,
    /// Pixels per unit of signal amplitude. Grows with gain.
    pub scale: f32,
    pub center: (f32, f32),
}

impl TraceFrame {
    pub fn is_blank(&self) -> bool {
        self.signal.is_none() || self.visible_len == 0
    }

    /// Canvas-space points for the visible prefix of the signal. Left maps
    /// to x, right to y with y pointing up.
    pub fn points(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        let (cx, cy) = self.center;
        let scale = self.scale;
        self.signal
            .iter()
            .flat_map(move |signal| (0..self.visible_len).map(move |i| signal.frame(i)))
            .map(move |(x, y)| (cx + x * scale, cy - y * scale))
    }
}

/// Samples the timeline once per display refresh and hands the visible part
/// of the active signal to a [`TraceSink`].
#[derive(Debug)]
pub struct Visualizer {
    canvas: Canvas,
    points: Vec<(f32, f32)>,
}

impl Visualizer {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            canvas,
            points: Vec::new(),
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub fn resize(&mut self, canvas: Canvas) {
        self.canvas = canvas;
    }

    /// Resolves `position` against `scene`. The geometry factor is
    /// `0.5 * min(width, height) * gain`, so gain zooms the trace as well as
    /// setting loudness.
    pub fn sample(&self, scene: &Scene, position: f64) -> TraceFrame {
        let resolved = scene.resolve(position);
        let gain = scene.config().gain();
        TraceFrame {
            signal: resolved.signal.cloned(),
            index: resolved.index,
            progress: resolved.progress,
            visible_len: resolved.visible_len(),
            scale: 0.5 * self.canvas.width.min(self.canvas.height) * gain,
            center: self.canvas.center(),
        }
    }

    /// Clears the sink and draws the current trace, if any.
    pub fn draw(&mut self, handle: &SceneHandle, sink: &mut impl TraceSink) -> TraceFrame {
        let scene = handle.snapshot();
        let frame = self.sample(&scene, handle.position());

        sink.clear();
        if !frame.is_blank() {
            self.points.clear();
            self.points.extend(frame.points());
            sink.polyline(&self.points);
        }
        frame
    }
}
