//! Geometry database boundary.
//!
//! The scene state layer never reads the database format itself - it talks
//! to a `GeometryDb` implementation through name lookups, ordered comb tree
//! walks and attribute queries. The database is free to be disk-backed or
//! in-memory; `MemoryDb` is the bundled in-memory implementation.
//!
//! Change notification is pull-free: the application observes database
//! mutations by whatever means the backing store provides and reports them
//! to `SceneDb::{note_added, note_changed, note_removed}` before calling
//! `sync()`.

pub mod memory;

pub use memory::MemoryDb;

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::geom::Aabb;
use glam::DMat4;

/// Boolean operator attached to one comb tree instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOp {
    Union,
    Subtract,
    Intersect,
}

impl BoolOp {
    /// Conventional single-character spelling (`u`, `-`, `+`).
    pub fn symbol(self) -> char {
        match self {
            BoolOp::Union => 'u',
            BoolOp::Subtract => '-',
            BoolOp::Intersect => '+',
        }
    }
}

/// What kind of object a name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Leaf shape with its own geometry.
    Solid,
    /// Combination: a boolean tree over instanced children.
    Comb,
}

/// One leaf of a comb's boolean tree, in tree order: the referenced child
/// name (which is NOT guaranteed to resolve to a database object), the
/// boolean operator, and an optional instance matrix (`None` = identity).
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub name: String,
    pub op: BoolOp,
    pub matrix: Option<DMat4>,
}

impl TreeEntry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            op: BoolOp::Union,
            matrix: None,
        }
    }

    pub fn op(mut self, op: BoolOp) -> Self {
        self.op = op;
        self
    }

    pub fn matrix(mut self, m: DMat4) -> Self {
        self.matrix = Some(m);
        self
    }
}

/// Drawing-relevant attributes of a database object.
///
/// These are normally buried in the object's attribute block on disk; the
/// scene state caches them so drawing never has to crack the database
/// during a redraw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectAttrs {
    /// Explicit object color, if one is set.
    pub color: Option<[u8; 3]>,
    /// Color inheritance flag - a comb with both a color and this flag
    /// overrides colors set below it.
    pub color_inherit: bool,
    /// Region identifier, if assigned. A set region flag with no id is
    /// treated as id 0 by the attribute reader.
    pub region_id: Option<i64>,
    /// Region flag.
    pub region_flag: bool,
}

/// Read access to a hierarchical CAD database.
///
/// Implementations must be cheap to query repeatedly - `SceneDb` calls
/// these methods during sync, not during every draw.
pub trait GeometryDb: Send {
    /// Resolve a name to an object kind, or `None` if no such object.
    fn lookup(&self, name: &str) -> Option<ObjectKind>;

    /// Names of every object in the database.
    fn object_names(&self) -> Vec<String>;

    /// Ordered (child, op, matrix) leaves of a comb's boolean tree.
    /// `None` if `name` is not a comb.
    fn comb_tree(&self, name: &str) -> Option<Vec<TreeEntry>>;

    /// Untransformed bounding box of a solid. `None` for combs (their
    /// bounds derive from their children) and unknown names.
    fn solid_bounds(&self, name: &str) -> Option<Aabb>;

    /// Drawing attributes for an object. Unknown names get defaults.
    fn attributes(&self, name: &str) -> ObjectAttrs;

    /// Downcast support for application code that owns a concrete backend.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
