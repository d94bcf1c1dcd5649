//! Renderer boundary.
//!
//! The scene state layer decides WHAT is visible; an external renderer
//! decides how to turn that into pixels. For every drawn path the core
//! issues a `SceneObjRequest` (accumulated matrix, resolved color, line
//! style, bounds, staleness) and stores the opaque `SceneHandle` the
//! renderer returns. `Render()` later forwards those handles back.
//!
//! `RecordingRenderer` is the bundled no-op implementation: it remembers
//! every request and draw call so tests and headless tools can inspect the
//! draw stream.

use std::any::Any;
use std::collections::HashMap;

use glam::DMat4;
use serde::{Deserialize, Serialize};

use crate::geom::Aabb;

/// Drawing mode for one visualized path.
///
/// `EvalWireframe` and `EvalPoints` are "evaluated" modes: the booleans
/// along the path are resolved into a single visual, so drawn-set
/// membership for them is exact-path only and they are never expanded to
/// leaves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DrawMode {
    Wireframe,
    Shaded,
    ShadedAll,
    EvalWireframe,
    HiddenLine,
    EvalPoints,
}

impl DrawMode {
    /// True for modes that pre-combine booleans into one visual keyed to
    /// the exact combination path.
    pub fn is_evaluated(self) -> bool {
        matches!(self, DrawMode::EvalWireframe | DrawMode::EvalPoints)
    }

    pub fn index(self) -> u32 {
        match self {
            DrawMode::Wireframe => 0,
            DrawMode::Shaded => 1,
            DrawMode::ShadedAll => 2,
            DrawMode::EvalWireframe => 3,
            DrawMode::HiddenLine => 4,
            DrawMode::EvalPoints => 5,
        }
    }

    pub fn from_index(i: u32) -> Option<DrawMode> {
        match i {
            0 => Some(DrawMode::Wireframe),
            1 => Some(DrawMode::Shaded),
            2 => Some(DrawMode::ShadedAll),
            3 => Some(DrawMode::EvalWireframe),
            4 => Some(DrawMode::HiddenLine),
            5 => Some(DrawMode::EvalPoints),
            _ => None,
        }
    }
}

/// Opaque renderer-side identity of one materialized scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SceneHandle(pub u64);

/// Everything a renderer needs to materialize or refresh one drawn path.
#[derive(Debug, Clone)]
pub struct SceneObjRequest {
    /// Display string of the path ("a/b/c.s", instance suffixes included).
    pub name: String,
    /// Hash of the full path element sequence.
    pub path_hash: u64,
    pub mode: DrawMode,
    /// Accumulated root-to-leaf transform.
    pub matrix: DMat4,
    /// Resolved drawing color (overrides already applied).
    pub color: [u8; 3],
    pub line_width: i32,
    pub transparency: f64,
    /// Dashed line style (subtraction/intersection on an un-evaluated
    /// wireframe).
    pub dashed: bool,
    /// Pre-transform bounds of the leaf, if known.
    pub bounds: Option<Aabb>,
    /// Level of detail the consuming view(s) need.
    pub detail_level: u32,
    /// True when an existing handle's geometry is suspect and must be
    /// regenerated rather than reused.
    pub stale: bool,
}

/// Renderer contract consumed by the scene state layer.
pub trait SceneRenderer: Send {
    /// Create a renderable representation; the returned handle is stored
    /// by the core and passed to later calls.
    fn materialize(&mut self, req: &SceneObjRequest) -> SceneHandle;

    /// Update an existing representation in place.
    fn refresh(&mut self, handle: SceneHandle, req: &SceneObjRequest);

    /// Drop a representation. The handle is dead after this call.
    fn release(&mut self, handle: SceneHandle);

    /// Present one object. Called once per visible handle per `Render()`.
    fn draw(&mut self, handle: SceneHandle);

    /// Toggle selection highlighting on one object.
    fn highlight(&mut self, handle: SceneHandle, on: bool);

    /// Downcast support for application code that owns a concrete renderer.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Renderer that records the request/draw stream instead of rendering.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    next_id: u64,
    /// Live handles and the most recent request used to (re)build them.
    pub live: HashMap<SceneHandle, SceneObjRequest>,
    /// Handles drawn since the last `clear_log()`.
    pub drawn: Vec<SceneHandle>,
    /// Handles released over the renderer's lifetime.
    pub released: Vec<SceneHandle>,
    /// Current highlight flags.
    pub highlighted: HashMap<SceneHandle, bool>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a live handle by display name.
    pub fn find(&self, name: &str) -> Option<SceneHandle> {
        self.live
            .iter()
            .find(|(_, req)| req.name == name)
            .map(|(h, _)| *h)
    }

    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.live.values().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    pub fn clear_log(&mut self) {
        self.drawn.clear();
    }
}

impl SceneRenderer for RecordingRenderer {
    fn materialize(&mut self, req: &SceneObjRequest) -> SceneHandle {
        self.next_id += 1;
        let handle = SceneHandle(self.next_id);
        self.live.insert(handle, req.clone());
        handle
    }

    fn refresh(&mut self, handle: SceneHandle, req: &SceneObjRequest) {
        self.live.insert(handle, req.clone());
    }

    fn release(&mut self, handle: SceneHandle) {
        self.live.remove(&handle);
        self.highlighted.remove(&handle);
        self.released.push(handle);
    }

    fn draw(&mut self, handle: SceneHandle) {
        self.drawn.push(handle);
    }

    fn highlight(&mut self, handle: SceneHandle, on: bool) {
        self.highlighted.insert(handle, on);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
