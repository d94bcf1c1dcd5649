//! Ground-truth records mirroring the database hierarchy.
//!
//! `DbObject` mirrors one database object; a comb's boolean tree is
//! flattened into ordered `CombInstance` records. Both are owned by the
//! `GroundTruth` maps and addressed by stable u64 keys - every other part
//! of the crate references them by key and must treat "key not found" as a
//! routine outcome, since sync may have invalidated the entry in between.

use std::collections::{HashMap, HashSet};

use glam::DMat4;
use tracing::trace;

use crate::cache::DiskCache;
use crate::db::{BoolOp, GeometryDb, ObjectAttrs, ObjectKind, TreeEntry};
use crate::geom::Aabb;
use crate::hash::{name_hash, pair_hash};

/// One edge in a comb's boolean tree: a unique instance of a child object
/// inside one parent comb.
///
/// If a comb's tree references the same child name more than once, every
/// occurrence gets an `iname` of the form `name@K` (K counting from 0 in
/// tree order) so each instance stays individually addressable, even when
/// two of them carry identical matrices. The instance key `ihash` derives
/// from (parent name, iname-or-name), so it is stable across re-syncs as
/// long as the tree position is unchanged.
#[derive(Debug, Clone)]
pub struct CombInstance {
    pub parent_name: String,
    /// Referenced child name. Nothing guarantees this resolves to a live
    /// database object.
    pub child_name: String,
    /// Disambiguating display name (`child@K`), set only for repeated
    /// children.
    pub iname: Option<String>,
    /// 0-based occurrence index among same-named children of this parent.
    pub idx: u64,
    /// Hash of `parent_name`.
    pub parent_hash: u64,
    /// Hash of `child_name` - the object key the instance points at.
    pub child_hash: u64,
    /// Instance identity: pair_hash(parent_hash, hash(iname or child_name)).
    pub ihash: u64,
    pub op: BoolOp,
    /// Instance matrix; `None` is an implicit identity.
    pub matrix: Option<DMat4>,
}

impl CombInstance {
    fn new(parent: &str, entry: &TreeEntry, idx: u64, repeated: bool) -> Self {
        let parent_hash = name_hash(parent);
        let child_hash = name_hash(&entry.name);
        let iname = if repeated {
            Some(format!("{}@{}", entry.name, idx))
        } else {
            None
        };
        let uniq_hash = match &iname {
            Some(n) => name_hash(n),
            None => child_hash,
        };
        Self {
            parent_name: parent.to_string(),
            child_name: entry.name.clone(),
            iname,
            idx,
            parent_hash,
            child_hash,
            ihash: pair_hash(parent_hash, uniq_hash),
            op: entry.op,
            matrix: entry.matrix,
        }
    }

    /// Name shown in path strings: `iname` when disambiguation applies.
    pub fn display_name(&self) -> &str {
        self.iname.as_deref().unwrap_or(&self.child_name)
    }

    pub fn local_matrix(&self) -> DMat4 {
        self.matrix.unwrap_or(DMat4::IDENTITY)
    }
}

/// Cache record for one database object.
#[derive(Debug, Clone)]
pub struct DbObject {
    pub name: String,
    pub hash: u64,
    pub is_comb: bool,
    /// Ordered child instance keys. Empty for leaves. Regenerated in full
    /// whenever the comb definition changes - never patched.
    pub instances: Vec<u64>,
    pub attrs: ObjectAttrs,
    /// Local bounds for solids, from the side cache or the database.
    /// Always `None` for combs; their bounds derive from children.
    pub bounds: Option<Aabb>,
}

/// The ".g ground truth" maps: every mirrored object and comb instance,
/// keyed by hash.
///
/// Mutated only by sync logic; the rest of the crate gets shared access
/// through a narrow read surface.
#[derive(Debug, Default)]
pub struct GroundTruth {
    pub(crate) objects: HashMap<u64, DbObject>,
    pub(crate) instances: HashMap<u64, CombInstance>,
}

impl GroundTruth {
    pub fn object(&self, hash: u64) -> Option<&DbObject> {
        self.objects.get(&hash)
    }

    pub fn object_by_name(&self, name: &str) -> Option<&DbObject> {
        self.objects.get(&name_hash(name))
    }

    pub fn instance(&self, hash: u64) -> Option<&CombInstance> {
        self.instances.get(&hash)
    }

    /// True if the hash indexes either an object or a comb instance.
    pub fn valid_hash(&self, hash: u64) -> bool {
        self.objects.contains_key(&hash) || self.instances.contains_key(&hash)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Decode any entity hash for diagnostics.
    pub fn hash_str(&self, hash: u64) -> String {
        if let Some(o) = self.objects.get(&hash) {
            return o.name.clone();
        }
        if let Some(i) = self.instances.get(&hash) {
            return i.display_name().to_string();
        }
        format!("unknown hash {:#x}", hash)
    }

    /// The OBJECT a path element denotes: root elements are object keys
    /// already, instance elements point at their referenced child.
    pub fn element_object(&self, elem: u64) -> Option<u64> {
        if self.objects.contains_key(&elem) {
            return Some(elem);
        }
        self.instances.get(&elem).map(|i| i.child_hash)
    }

    /// Ordered child instance keys of the comb a path element denotes.
    /// `None` if the element resolves to a leaf or to nothing.
    pub fn element_children(&self, elem: u64) -> Option<&[u64]> {
        let ohash = self.element_object(elem)?;
        let obj = self.objects.get(&ohash)?;
        if obj.is_comb {
            Some(&obj.instances)
        } else {
            None
        }
    }

    /// Untransformed bounds of one object. For combs this unions every
    /// child instance's transformed bounds; cycles are cut rather than
    /// recursed.
    pub fn object_bounds(&self, hash: u64) -> Option<Aabb> {
        let mut stack = HashSet::new();
        self.object_bounds_guarded(hash, &mut stack)
    }

    fn object_bounds_guarded(&self, hash: u64, stack: &mut HashSet<u64>) -> Option<Aabb> {
        let obj = self.objects.get(&hash)?;
        if !obj.is_comb {
            return obj.bounds;
        }
        if !stack.insert(hash) {
            return None;
        }
        let mut bb = Aabb::EMPTY;
        for ihash in &obj.instances {
            let Some(inst) = self.instances.get(ihash) else {
                continue;
            };
            // A dangling child contributes nothing.
            let Some(child_bb) = self.object_bounds_guarded(inst.child_hash, stack) else {
                continue;
            };
            match inst.matrix {
                Some(m) => bb.merge(&child_bb.transformed(&m)),
                None => bb.merge(&child_bb),
            }
        }
        stack.remove(&hash);
        if bb.valid() {
            Some(bb)
        } else {
            None
        }
    }

    // -- Sync-side mutation ------------------------------------------------

    /// Mirror one database object, replacing any previous record. Returns
    /// the object key, or `None` if the name no longer resolves.
    pub(crate) fn insert_object(
        &mut self,
        db: &dyn GeometryDb,
        cache: &mut DiskCache,
        name: &str,
    ) -> Option<u64> {
        let kind = db.lookup(name)?;
        let hash = name_hash(name);

        // Drop any instances a previous incarnation owned.
        if let Some(old) = self.objects.remove(&hash) {
            for ihash in &old.instances {
                self.instances.remove(ihash);
            }
        }

        let attrs = match cache.attrs(hash) {
            Some(a) => a,
            None => {
                let a = db.attributes(name);
                cache.put_attrs(hash, a);
                a
            }
        };

        let mut obj = DbObject {
            name: name.to_string(),
            hash,
            is_comb: kind == ObjectKind::Comb,
            instances: Vec::new(),
            attrs,
            bounds: None,
        };

        match kind {
            ObjectKind::Solid => {
                obj.bounds = match cache.bounds(hash) {
                    Some(bb) => Some(bb),
                    None => {
                        let bb = db.solid_bounds(name);
                        if let Some(bb) = bb {
                            cache.put_bounds(hash, bb);
                        }
                        bb
                    }
                };
            }
            ObjectKind::Comb => {
                if let Some(tree) = db.comb_tree(name) {
                    obj.instances = self.gen_instances(name, &tree);
                }
            }
        }

        trace!(name, hash, comb = obj.is_comb, "mirrored object");
        self.objects.insert(hash, obj);
        Some(hash)
    }

    /// Flatten a comb tree into registered instances, disambiguating
    /// repeated child names with 0-based `@K` suffixes.
    fn gen_instances(&mut self, parent: &str, tree: &[TreeEntry]) -> Vec<u64> {
        let mut totals: HashMap<&str, u64> = HashMap::new();
        for entry in tree {
            *totals.entry(entry.name.as_str()).or_insert(0) += 1;
        }

        let mut seen: HashMap<&str, u64> = HashMap::new();
        let mut out = Vec::with_capacity(tree.len());
        for entry in tree {
            let idx = {
                let c = seen.entry(entry.name.as_str()).or_insert(0);
                let idx = *c;
                *c += 1;
                idx
            };
            let repeated = totals[entry.name.as_str()] > 1;
            let inst = CombInstance::new(parent, entry, idx, repeated);
            let ihash = inst.ihash;
            self.instances.insert(ihash, inst);
            out.push(ihash);
        }
        out
    }

    /// Remove a mirrored object and every instance that references it -
    /// both the instances it owns and instances in OTHER combs pointing at
    /// it by name. Paths walking through any of them stop resolving.
    ///
    /// Returns the keys of surviving combs whose instance lists changed,
    /// so dependent drawn state can be refreshed.
    pub(crate) fn remove_object(&mut self, hash: u64) -> Vec<u64> {
        if let Some(old) = self.objects.remove(&hash) {
            for ihash in &old.instances {
                self.instances.remove(ihash);
            }
        }

        // Foreign instances referencing the removed object by child name.
        let doomed: Vec<u64> = self
            .instances
            .values()
            .filter(|i| i.child_hash == hash)
            .map(|i| i.ihash)
            .collect();
        for ihash in &doomed {
            self.instances.remove(ihash);
        }

        let mut touched_parents = Vec::new();
        if !doomed.is_empty() {
            for obj in self.objects.values_mut() {
                let before = obj.instances.len();
                obj.instances.retain(|ih| !doomed.contains(ih));
                if obj.instances.len() != before {
                    touched_parents.push(obj.hash);
                }
            }
        }
        touched_parents
    }

    /// Rebuild everything from the database. The incremental paths above
    /// are preferred; this is the escape hatch when notification tracking
    /// is not trusted.
    pub(crate) fn rebuild(&mut self, db: &dyn GeometryDb, cache: &mut DiskCache) {
        self.objects.clear();
        self.instances.clear();
        for name in db.object_names() {
            self.insert_object(db, cache, &name);
        }
    }
}
