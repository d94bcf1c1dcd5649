//! In-memory geometry database.
//!
//! Stores solids (bounds + attributes) and combs (ordered tree leaves) in a
//! name-keyed map. Used directly by applications that build geometry
//! procedurally, and by every test in this crate.

use std::any::Any;
use std::collections::HashMap;

use crate::db::{BoolOp, GeometryDb, ObjectAttrs, ObjectKind, TreeEntry};
use crate::geom::Aabb;
use glam::DVec3;

#[derive(Debug, Clone)]
struct MemoryObject {
    kind: ObjectKind,
    bounds: Option<Aabb>,
    attrs: ObjectAttrs,
    tree: Vec<TreeEntry>,
}

/// In-memory `GeometryDb` implementation.
///
/// Mutations do NOT notify anyone - after changing a `MemoryDb` that backs
/// a `SceneDb`, report the change through `note_added` / `note_changed` /
/// `note_removed` and call `sync()`.
#[derive(Debug, Default)]
pub struct MemoryDb {
    objects: HashMap<String, MemoryObject>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a solid with a unit-ish default bounding box.
    pub fn add_solid(&mut self, name: &str) {
        self.add_solid_bounded(name, Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0)));
    }

    /// Add (or replace) a solid with explicit local bounds.
    pub fn add_solid_bounded(&mut self, name: &str, bounds: Aabb) {
        self.objects.insert(
            name.to_string(),
            MemoryObject {
                kind: ObjectKind::Solid,
                bounds: Some(bounds),
                attrs: ObjectAttrs::default(),
                tree: Vec::new(),
            },
        );
    }

    /// Add (or replace) a comb from ordered tree leaves.
    pub fn add_comb(&mut self, name: &str, tree: Vec<TreeEntry>) {
        self.objects.insert(
            name.to_string(),
            MemoryObject {
                kind: ObjectKind::Comb,
                bounds: None,
                attrs: ObjectAttrs::default(),
                tree,
            },
        );
    }

    /// Convenience: a comb of plain union members.
    pub fn add_union_comb(&mut self, name: &str, children: &[&str]) {
        let tree = children.iter().map(|c| TreeEntry::new(c)).collect();
        self.add_comb(name, tree);
    }

    /// Set drawing attributes on an existing object. Returns false if the
    /// object does not exist.
    pub fn set_attrs(&mut self, name: &str, attrs: ObjectAttrs) -> bool {
        match self.objects.get_mut(name) {
            Some(obj) => {
                obj.attrs = attrs;
                true
            }
            None => false,
        }
    }

    /// Set the color attribute on an existing object.
    pub fn set_color(&mut self, name: &str, rgb: [u8; 3], inherit: bool) -> bool {
        match self.objects.get_mut(name) {
            Some(obj) => {
                obj.attrs.color = Some(rgb);
                obj.attrs.color_inherit = inherit;
                true
            }
            None => false,
        }
    }

    /// Remove an object. Comb trees referencing the name are left alone -
    /// dangling references are legal in the tree model.
    pub fn remove(&mut self, name: &str) -> bool {
        self.objects.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl GeometryDb for MemoryDb {
    fn lookup(&self, name: &str) -> Option<ObjectKind> {
        self.objects.get(name).map(|o| o.kind)
    }

    fn object_names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    fn comb_tree(&self, name: &str) -> Option<Vec<TreeEntry>> {
        let obj = self.objects.get(name)?;
        match obj.kind {
            ObjectKind::Comb => Some(obj.tree.clone()),
            ObjectKind::Solid => None,
        }
    }

    fn solid_bounds(&self, name: &str) -> Option<Aabb> {
        let obj = self.objects.get(name)?;
        obj.bounds
    }

    fn attributes(&self, name: &str) -> ObjectAttrs {
        self.objects
            .get(name)
            .map(|o| o.attrs)
            .unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Shorthand used by tests and examples: a comb entry with a boolean op.
pub fn entry(name: &str, op: BoolOp) -> TreeEntry {
    TreeEntry::new(name).op(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_kinds() {
        let mut db = MemoryDb::new();
        db.add_solid("ball.s");
        db.add_union_comb("assembly", &["ball.s"]);

        assert_eq!(db.lookup("ball.s"), Some(ObjectKind::Solid));
        assert_eq!(db.lookup("assembly"), Some(ObjectKind::Comb));
        assert_eq!(db.lookup("missing"), None);
    }

    #[test]
    fn test_comb_tree_order_preserved() {
        let mut db = MemoryDb::new();
        db.add_comb(
            "a",
            vec![
                TreeEntry::new("x"),
                entry("y", BoolOp::Subtract),
                TreeEntry::new("x"),
            ],
        );
        let tree = db.comb_tree("a").unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[0].name, "x");
        assert_eq!(tree[1].op, BoolOp::Subtract);
        assert_eq!(tree[2].name, "x");
    }

    #[test]
    fn test_solid_bounds_only_for_solids() {
        let mut db = MemoryDb::new();
        db.add_solid("s");
        db.add_union_comb("c", &["s"]);
        assert!(db.solid_bounds("s").is_some());
        assert!(db.solid_bounds("c").is_none());
    }

    #[test]
    fn test_remove_leaves_dangling_references() {
        let mut db = MemoryDb::new();
        db.add_solid("s");
        db.add_union_comb("c", &["s"]);
        assert!(db.remove("s"));
        // The comb still names "s" even though it no longer resolves.
        assert_eq!(db.comb_tree("c").unwrap()[0].name, "s");
        assert_eq!(db.lookup("s"), None);
    }
}
