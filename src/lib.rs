//! scenedb - in-memory scene-graph mirror for hierarchical CAD databases.
//!
//! A CAD database stores leaf shapes and "combs": named boolean trees over
//! instanced children, each instance carrying its own transform. Walking
//! that tree from storage on every selection, redraw or edit is too slow
//! for interactive use, so this crate maintains an explicit in-memory
//! mirror of the hierarchy and the draw/selection state built on it:
//!
//! - [`SceneDb`] owns the mirror: objects and comb instances keyed by
//!   stable content hashes, a registered-path table with a reuse pool, all
//!   view states and selection states, and the incremental [`SceneDb::sync`]
//!   driven by added/changed/removed notifications.
//! - [`ObjPath`] is one root-to-leaf walk: push/pop with cycle refusal,
//!   lazily tracked cyclicity/validity, accumulated matrices and bounds.
//! - [`ViewState`] tracks which paths each rendering surface draws at
//!   which [`DrawMode`], with exact expand/collapse bookkeeping, partial
//!   draw answers and one-directional view linking.
//! - [`Selection`] keeps non-overlapping selected paths plus the derived
//!   sets highlighting needs.
//! - The database and renderer stay behind the [`GeometryDb`] and
//!   [`SceneRenderer`] traits; [`MemoryDb`] and [`RecordingRenderer`] are
//!   the bundled implementations.
//!
//! Everything cross-references by hash and treats failed lookups as
//! "invalidated since observed" - never as errors. The core is
//! single-threaded; the one background activity is the best-effort LOD
//! warming pass writing into [`LodCache`] with last-write-wins semantics.

pub mod cache;
pub mod db;
pub mod error;
pub mod geom;
pub mod hash;
pub mod scene;
pub mod state;

pub use cache::{DiskCache, LodCache, LodRecord, LodSeed};
pub use db::{BoolOp, GeometryDb, MemoryDb, ObjectAttrs, ObjectKind, TreeEntry};
pub use error::{Result, SceneDbError};
pub use geom::Aabb;
pub use scene::{DrawMode, RecordingRenderer, SceneHandle, SceneObjRequest, SceneRenderer};
pub use state::object::{CombInstance, DbObject, GroundTruth};
pub use state::path::{Cyclic, DrawSettings, ObjPath};
pub use state::select::Selection;
pub use state::view::{Camera, DrawnStatus, ViewId, ViewState};
pub use state::SceneDb;
