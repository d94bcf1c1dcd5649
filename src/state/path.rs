//! Paths: concrete root-to-leaf walks through the mirrored hierarchy.
//!
//! A path is a sequence of hashes - one object key for the root, then comb
//! instance keys for every edge taken below it. Paths answer structural
//! questions (depth, cyclicity, accumulated matrix, bounds, boolean
//! context) against the `GroundTruth` maps without touching the database.
//!
//! String syntax: `/`-delimited names, a literal `/` or `\` inside a name
//! escaped with a backslash, and repeated children addressed with the
//! `name@K` suffix assigned during tree flattening.

use std::collections::{BTreeMap, HashSet};

use glam::DMat4;
use serde::{Deserialize, Serialize};

use crate::db::BoolOp;
use crate::geom::Aabb;
use crate::hash::seq_hash;
use crate::scene::DrawMode;
use crate::state::object::{DbObject, GroundTruth};

// -- Path string syntax ----------------------------------------------------

/// Split a path string into de-escaped component names. Leading and
/// repeated separators are skipped; a trailing lone backslash is dropped.
pub(crate) fn split_path_string(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for ch in path.chars() {
        if escaped {
            cur.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '/' => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(ch),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Escape a name for embedding in a path string.
pub(crate) fn name_escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch == '/' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

// -- Sequence-level helpers ------------------------------------------------
//
// Views and selections work on raw element sequences to avoid materializing
// a path container per drawn leaf; the helpers below are that shared core.

/// Object key denoted by element `i` of `seq`, if it still resolves.
pub(crate) fn elem_obj(gt: &GroundTruth, seq: &[u64], i: usize) -> Option<u64> {
    if i == 0 {
        Some(seq[0])
    } else {
        gt.instance(seq[i]).map(|c| c.child_hash)
    }
}

/// Every element resolves against the ground truth maps.
pub(crate) fn seq_valid(gt: &GroundTruth, seq: &[u64]) -> bool {
    if seq.is_empty() || gt.object(seq[0]).is_none() {
        return false;
    }
    seq[1..].iter().all(|e| gt.instance(*e).is_some())
}

/// Leaf-only cycle test: does the last element revisit any ancestor's
/// object? O(depth). Sufficient when every prior prefix is known acyclic.
pub(crate) fn seq_addition_cyclic(gt: &GroundTruth, seq: &[u64]) -> bool {
    if seq.len() < 2 {
        return false;
    }
    let Some(leaf) = elem_obj(gt, seq, seq.len() - 1) else {
        return false;
    };
    (0..seq.len() - 1).any(|i| elem_obj(gt, seq, i) == Some(leaf))
}

/// Full pairwise cycle test, O(depth^2). For use after bulk mutation where
/// incremental invariants cannot be trusted.
pub(crate) fn seq_cyclic_full(gt: &GroundTruth, seq: &[u64]) -> bool {
    if seq.len() < 2 {
        return false;
    }
    for i in (1..seq.len()).rev() {
        let Some(oi) = elem_obj(gt, seq, i) else {
            continue;
        };
        for j in 0..i {
            if elem_obj(gt, seq, j) == Some(oi) {
                return true;
            }
        }
    }
    false
}

/// Accumulated root-to-leaf transform. Unresolvable or matrix-less
/// elements contribute identity.
pub(crate) fn seq_matrix(gt: &GroundTruth, seq: &[u64]) -> DMat4 {
    let mut m = DMat4::IDENTITY;
    for e in seq.iter().skip(1) {
        if let Some(inst) = gt.instance(*e) {
            if let Some(im) = inst.matrix {
                m *= im;
            }
        }
    }
    m
}

/// Leaf bounds positioned by the accumulated path matrix. `None` when the
/// leaf no longer resolves to a live object (a comb may legally reference
/// a name with no geometry behind it).
pub(crate) fn seq_bbox(gt: &GroundTruth, seq: &[u64]) -> Option<Aabb> {
    if seq.is_empty() {
        return None;
    }
    let leaf = elem_obj(gt, seq, seq.len() - 1)?;
    let bb = gt.object_bounds(leaf)?;
    if seq.len() == 1 {
        return Some(bb);
    }
    Some(bb.transformed(&seq_matrix(gt, seq)))
}

/// True if any instance on the path carries `op`.
pub(crate) fn seq_has_op(gt: &GroundTruth, seq: &[u64], op: BoolOp) -> bool {
    seq.iter()
        .skip(1)
        .filter_map(|e| gt.instance(*e))
        .any(|inst| inst.op == op)
}

/// Resolve the drawing color for a path from object attributes: a comb
/// with both a color and the inherit flag wins root-down; otherwise the
/// deepest explicit color wins leaf-up.
pub(crate) fn seq_color(gt: &GroundTruth, seq: &[u64]) -> Option<[u8; 3]> {
    let objs: Vec<&DbObject> = (0..seq.len())
        .filter_map(|i| elem_obj(gt, seq, i))
        .filter_map(|h| gt.object(h))
        .collect();

    for o in &objs {
        if o.attrs.color_inherit {
            if let Some(c) = o.attrs.color {
                return Some(c);
            }
        }
    }
    for o in objs.iter().rev() {
        if let Some(c) = o.attrs.color {
            return Some(c);
        }
    }
    None
}

/// Rebuild the display string for an element sequence, limited to `pmax`
/// elements when `pmax` is nonzero.
pub(crate) fn seq_to_string(gt: &GroundTruth, seq: &[u64], pmax: usize) -> String {
    if seq.is_empty() {
        return String::new();
    }
    let ecnt = if pmax == 0 || pmax > seq.len() {
        seq.len()
    } else {
        pmax
    };
    let mut out = String::new();
    match gt.object(seq[0]) {
        Some(o) => out.push_str(&name_escape(&o.name)),
        None => out.push_str(&gt.hash_str(seq[0])),
    }
    for e in &seq[1..ecnt] {
        out.push('/');
        match gt.instance(*e) {
            Some(inst) => out.push_str(&name_escape(inst.display_name())),
            None => out.push_str(&gt.hash_str(*e)),
        }
    }
    out
}

/// Parse a path string against the ground truth, resolving each component
/// to an element key. Returns `None` when any component fails to resolve.
/// A cycle inside the string terminates the walk at the cyclic element.
pub(crate) fn seq_from_string(gt: &GroundTruth, path: &str) -> Option<Vec<u64>> {
    let names = split_path_string(path);
    if names.is_empty() {
        return None;
    }

    let root = crate::hash::name_hash(&names[0]);
    gt.object(root)?;
    let mut seq = vec![root];
    let mut parent_obj = root;

    for name in &names[1..] {
        let ihash = crate::hash::pair_hash(parent_obj, crate::hash::name_hash(name));
        let inst = gt.instance(ihash)?;
        parent_obj = inst.child_hash;
        seq.push(ihash);
        if seq_addition_cyclic(gt, &seq) {
            break;
        }
    }
    Some(seq)
}

// -- Draw settings ---------------------------------------------------------

/// Per-path, per-mode drawing overrides. A set value overrides whatever
/// would be derived from path data at bake time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawSettings {
    /// 0 = transparent, 1 = opaque.
    pub transparency: f64,
    pub color_override: Option<[u8; 3]>,
    pub line_width: i32,
    pub arrow_tip_length: f64,
    pub arrow_tip_width: f64,
    /// Suppress dashed-line styling for subtractions.
    pub draw_solid_lines_only: bool,
    /// Skip subtracted branches entirely when expanding for draw.
    pub draw_non_subtract_only: bool,
}

impl Default for DrawSettings {
    fn default() -> Self {
        Self {
            transparency: 1.0,
            color_override: None,
            line_width: 1,
            arrow_tip_length: 0.0,
            arrow_tip_width: 0.0,
            draw_solid_lines_only: false,
            draw_non_subtract_only: false,
        }
    }
}

// -- ObjPath ---------------------------------------------------------------

/// Lazily-tracked cyclic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cyclic {
    No,
    Yes,
    Unknown,
}

/// One root-to-leaf walk, with cached structural bookkeeping.
///
/// Containers are reusable: `SceneDb::put_path` resets one and pools it
/// rather than dropping it, so interactive draw cycles do not churn
/// allocations.
#[derive(Debug, Clone)]
pub struct ObjPath {
    elements: Vec<u64>,
    path_hash: u64,
    /// Object keys the path references, for O(1) `uses()`.
    component_hashes: HashSet<u64>,
    /// Hashes of every proper prefix, for O(1) ancestor tests.
    parent_hashes: HashSet<u64>,
    cyclic: Cyclic,
    valid: bool,
    /// Per-mode drawing overrides.
    pub settings: BTreeMap<DrawMode, DrawSettings>,
}

impl Default for ObjPath {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjPath {
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            path_hash: 0,
            component_hashes: HashSet::new(),
            parent_hashes: HashSet::new(),
            cyclic: Cyclic::No,
            valid: true,
            settings: BTreeMap::new(),
        }
    }

    /// Build a path from its element keys. Cycles inside `elems` are
    /// representable (they exist in real databases); elements past a cycle
    /// point fail.
    pub fn from_elements(gt: &GroundTruth, elems: &[u64]) -> Option<Self> {
        let mut p = Self::new();
        for e in elems {
            p.push_unchecked(gt, *e)?;
        }
        if p.elements.is_empty() {
            return None;
        }
        Some(p)
    }

    /// Parse a path string. `None` when any component fails to resolve.
    pub fn from_string(gt: &GroundTruth, path: &str) -> Option<Self> {
        let seq = seq_from_string(gt, path)?;
        Self::from_elements(gt, &seq)
    }

    /// Prepare the container for reuse.
    pub fn reset(&mut self) {
        self.elements.clear();
        self.path_hash = 0;
        self.component_hashes.clear();
        self.parent_hashes.clear();
        self.cyclic = Cyclic::No;
        self.valid = true;
        self.settings.clear();
    }

    pub fn elements(&self) -> &[u64] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// How deep the leaf is: a single-object path is depth 0, `a/b/c` is
    /// depth 2.
    pub fn depth(&self) -> usize {
        self.elements.len().saturating_sub(1)
    }

    /// Cached hash of the full element sequence (0 for an empty path).
    pub fn hash(&self) -> u64 {
        self.path_hash
    }

    /// Hash of the sequence truncated to `max_len` elements (0 = full).
    pub fn hash_limited(&self, max_len: usize) -> u64 {
        if self.elements.is_empty() {
            return 0;
        }
        seq_hash(&self.elements, max_len)
    }

    /// Append an element, refusing to close a cycle. Returns the object
    /// key the new leaf denotes, `None` on any failure (path unmodified).
    pub fn push(&mut self, gt: &GroundTruth, element: u64) -> Option<u64> {
        self.push_inner(gt, element, true)
    }

    /// Append without the cycle refusal - for callers that must represent
    /// a cyclic walk that exists in the database. The path still refuses
    /// to grow past the cyclic element.
    pub fn push_unchecked(&mut self, gt: &GroundTruth, element: u64) -> Option<u64> {
        self.push_inner(gt, element, false)
    }

    fn push_inner(&mut self, gt: &GroundTruth, element: u64, refuse_cycle: bool) -> Option<u64> {
        // A cyclic or invalid path cannot grow.
        if self.cyclic == Cyclic::Yes || !self.valid {
            return None;
        }

        if self.elements.is_empty() {
            // Root element must be a mirrored object.
            gt.object(element)?;
            self.elements.push(element);
            self.component_hashes.insert(element);
            self.path_hash = seq_hash(&self.elements, 0);
            return Some(element);
        }

        // Everything below the root is a comb instance, and the instance's
        // parent comb must itself be mirrored. The instanced child need
        // not be - comb trees may reference absent objects.
        let inst = gt.instance(element)?;
        gt.object(inst.parent_hash)?;
        let child = inst.child_hash;

        if refuse_cycle {
            let revisits = (0..self.elements.len())
                .any(|i| elem_obj(gt, &self.elements, i) == Some(child));
            if revisits {
                return None;
            }
        }

        self.elements.push(element);
        self.component_hashes.insert(child);
        self.parent_hashes.insert(self.path_hash);
        self.path_hash = seq_hash(&self.elements, 0);
        self.cyclic = Cyclic::Unknown;
        self.cyclic(gt, false);
        Some(child)
    }

    /// Remove the last element. With `check` the cyclic/valid flags are
    /// recomputed; without it they are cleared to unknown/assumed-good for
    /// callers that have already proven safety.
    pub fn pop(&mut self, gt: &GroundTruth, check: bool) {
        if !self.elements.is_empty() {
            let mut rebuild = false;
            if self.elements.len() > 1 {
                match gt.instance(*self.elements.last().unwrap()) {
                    Some(inst) => {
                        self.component_hashes.remove(&inst.child_hash);
                    }
                    // Leaf no longer decodes, so we cannot tell which
                    // component it contributed.
                    None => rebuild = true,
                }
            } else {
                self.component_hashes.clear();
            }

            self.elements.pop();

            if rebuild {
                self.component_hashes.clear();
                self.component_hashes.insert(self.elements[0]);
                for e in &self.elements[1..] {
                    if let Some(inst) = gt.instance(*e) {
                        self.component_hashes.insert(inst.child_hash);
                    }
                }
            }
        }

        self.path_hash = if self.elements.is_empty() {
            0
        } else {
            seq_hash(&self.elements, 0)
        };
        self.parent_hashes.remove(&self.path_hash);

        if self.elements.is_empty() {
            self.valid = true;
            self.cyclic = Cyclic::No;
            return;
        }
        if !check {
            self.valid = true;
            self.cyclic = Cyclic::Unknown;
            return;
        }

        self.valid = seq_valid(gt, &self.elements);
        if self.cyclic != Cyclic::No {
            self.cyclic = Cyclic::Unknown;
            self.cyclic(gt, false);
        }
    }

    /// Report cyclicity. The default check verifies only the leaf against
    /// its ancestors (O(depth), enough while push invariants hold);
    /// `full_check` re-verifies every pair.
    pub fn cyclic(&mut self, gt: &GroundTruth, full_check: bool) -> bool {
        if !self.valid {
            return false;
        }
        if self.elements.len() < 2 {
            self.cyclic = Cyclic::No;
            return false;
        }
        if !full_check && self.cyclic != Cyclic::Unknown {
            return self.cyclic == Cyclic::Yes;
        }
        let hit = if full_check {
            seq_cyclic_full(gt, &self.elements)
        } else {
            seq_addition_cyclic(gt, &self.elements)
        };
        self.cyclic = if hit { Cyclic::Yes } else { Cyclic::No };
        hit
    }

    /// Report validity against the current ground truth. Once a dead
    /// element is observed the flag latches until a pop removes it.
    pub fn valid(&mut self, gt: &GroundTruth) -> bool {
        if !self.valid {
            return false;
        }
        self.valid = seq_valid(gt, &self.elements);
        self.valid
    }

    /// True if the path references the object (or instance child) `hash`.
    pub fn uses(&self, hash: u64) -> bool {
        self.component_hashes.contains(&hash)
    }

    /// True if `self` is a proper ancestor path of `p`.
    pub fn parent_of(&self, p: &ObjPath) -> bool {
        p.parent_hashes.contains(&self.path_hash)
    }

    /// True if `self` is a proper descendant path of `p`.
    pub fn child_of(&self, p: &ObjPath) -> bool {
        self.parent_hashes.contains(&p.path_hash)
    }

    /// Object record at path index `ind` (`None` when it does not decode;
    /// for instance elements that is NOT an invalid path - the referenced
    /// child may simply not exist).
    pub fn object_at<'a>(&self, gt: &'a GroundTruth, ind: usize) -> Option<&'a DbObject> {
        if ind >= self.elements.len() {
            return None;
        }
        let ohash = elem_obj(gt, &self.elements, ind)?;
        gt.object(ohash)
    }

    /// Leaf object record, if it resolves.
    pub fn leaf_object<'a>(&self, gt: &'a GroundTruth) -> Option<&'a DbObject> {
        if self.elements.is_empty() {
            return None;
        }
        self.object_at(gt, self.elements.len() - 1)
    }

    /// Comb instance at path index `ind` (1-based positions; the root is
    /// never an instance).
    pub fn instance_at<'a>(
        &self,
        gt: &'a GroundTruth,
        ind: usize,
    ) -> Option<&'a crate::state::object::CombInstance> {
        if ind == 0 || ind >= self.elements.len() {
            return None;
        }
        gt.instance(self.elements[ind])
    }

    /// Accumulated root-to-leaf transform; identity at depth 0.
    pub fn matrix(&self, gt: &GroundTruth) -> DMat4 {
        seq_matrix(gt, &self.elements)
    }

    /// Leaf bounds under the accumulated transform.
    pub fn bbox(&self, gt: &GroundTruth) -> Option<Aabb> {
        seq_bbox(gt, &self.elements)
    }

    /// Any subtraction along the path (used for dashed wireframes).
    pub fn is_subtraction(&self, gt: &GroundTruth) -> bool {
        seq_has_op(gt, &self.elements, BoolOp::Subtract)
    }

    /// Any intersection along the path.
    pub fn is_intersection(&self, gt: &GroundTruth) -> bool {
        seq_has_op(gt, &self.elements, BoolOp::Intersect)
    }

    /// Active drawing color: per-mode override first (`None` = whichever
    /// mode is set), then attribute-derived path color.
    pub fn color(&self, gt: &GroundTruth, mode: Option<DrawMode>) -> Option<[u8; 3]> {
        let ds = match mode {
            Some(m) => self.settings.get(&m),
            None => self.settings.values().next(),
        };
        if let Some(ds) = ds {
            if let Some(c) = ds.color_override {
                return Some(c);
            }
        }
        seq_color(gt, &self.elements)
    }

    /// Display string (`pmax` nonzero limits the element count).
    pub fn path_str(&self, gt: &GroundTruth) -> String {
        seq_to_string(gt, &self.elements, 0)
    }

    pub fn path_str_limited(&self, gt: &GroundTruth, pmax: usize) -> String {
        seq_to_string(gt, &self.elements, pmax)
    }
}

impl PartialEq for ObjPath {
    fn eq(&self, other: &Self) -> bool {
        self.path_hash == other.path_hash
    }
}
