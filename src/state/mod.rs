//! Scene state: the in-memory mirror of a hierarchical CAD database and
//! the draw/selection bookkeeping built on top of it.
//!
//! `SceneDb` is the single owner of all mirrored state. External code
//! reports database mutations through the notification sets and calls
//! `sync()`; everything else (views, selections, registered paths) resolves
//! entities by hash and treats a failed lookup as "invalidated since I last
//! looked", never as an error.

pub mod object;
pub mod path;
pub mod select;
pub mod view;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{debug, info};

use crate::cache::{DiskCache, LodCache, LodRecord, LodSeed};
use crate::db::GeometryDb;
use crate::error::Result;
use crate::hash::{name_hash, seq_hash};
use crate::scene::{DrawMode, SceneHandle, SceneRenderer};
use crate::state::object::GroundTruth;
use crate::state::path::{seq_addition_cyclic, seq_from_string, DrawSettings, ObjPath};
use crate::state::select::Selection;
use crate::state::view::{DrawnStatus, ViewId, ViewState};

// -- Ordering --------------------------------------------------------------

/// Natural ("alphanum") string ordering: digit runs compare numerically,
/// so `s2` sorts before `s10`.
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let ab = a.as_bytes();
    let bb = b.as_bytes();
    let (mut i, mut j) = (0, 0);
    while i < ab.len() && j < bb.len() {
        let (ca, cb) = (ab[i], bb[j]);
        if ca.is_ascii_digit() && cb.is_ascii_digit() {
            let si = i;
            while i < ab.len() && ab[i].is_ascii_digit() {
                i += 1;
            }
            let sj = j;
            while j < bb.len() && bb[j].is_ascii_digit() {
                j += 1;
            }
            let na = a[si..i].trim_start_matches('0');
            let nb = b[sj..j].trim_start_matches('0');
            let ord = na
                .len()
                .cmp(&nb.len())
                .then_with(|| na.cmp(nb))
                .then_with(|| (i - si).cmp(&(j - sj)));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            if ca != cb {
                return ca.cmp(&cb);
            }
            i += 1;
            j += 1;
        }
    }
    (ab.len() - i).cmp(&(bb.len() - j))
}

// -- Shared tree algorithms ------------------------------------------------

/// Expand one path to its leaves: descend comb instances until reaching a
/// non-comb (or unresolvable, or empty) object. Cyclic branches terminate
/// at the revisiting element instead of recursing.
pub(crate) fn expand_seq(gt: &GroundTruth, seq: &mut Vec<u64>, out: &mut Vec<Vec<u64>>) {
    let leaf = *seq.last().expect("expand on empty path");
    match gt.element_children(leaf) {
        Some(children) if !children.is_empty() && !seq_addition_cyclic(gt, seq) => {
            let kids = children.to_vec();
            for c in kids {
                seq.push(c);
                expand_seq(gt, seq, out);
                seq.pop();
            }
        }
        _ => out.push(seq.clone()),
    }
}

/// Insert the hash of every path at or below `seq` into `set` - all
/// intermediate paths included, not just leaves.
pub(crate) fn collect_below(gt: &GroundTruth, seq: &mut Vec<u64>, set: &mut HashSet<u64>) {
    set.insert(seq_hash(seq, 0));
    if seq_addition_cyclic(gt, seq) {
        return;
    }
    if let Some(children) = gt.element_children(*seq.last().expect("empty path")) {
        for c in children.to_vec() {
            seq.push(c);
            collect_below(gt, seq, set);
            seq.pop();
        }
    }
}

/// Remove the hash of every path at or below `seq` from `set`.
pub(crate) fn clear_below(gt: &GroundTruth, seq: &mut Vec<u64>, set: &mut HashSet<u64>) {
    set.remove(&seq_hash(seq, 0));
    if seq_addition_cyclic(gt, seq) {
        return;
    }
    if let Some(children) = gt.element_children(*seq.last().expect("empty path")) {
        for c in children.to_vec() {
            seq.push(c);
            clear_below(gt, seq, set);
            seq.pop();
        }
    }
}

/// Collapse a set of (typically leaf) paths to the shallowest ancestors
/// whose expansions exactly reproduce the input.
///
/// Returns `(collapsed paths, fully-drawn hashes, partially-drawn hashes)`.
/// An ancestor is promoted ONLY when every child its comb defines is
/// present in the input - summarizing must never pull in siblings that
/// were not asked for.
pub(crate) fn collapse_seqs(
    gt: &GroundTruth,
    seqs: &[Vec<u64>],
) -> (Vec<Vec<u64>>, HashSet<u64>, HashSet<u64>) {
    use std::collections::BTreeMap;

    let mut collapsed: Vec<Vec<u64>> = Vec::new();
    let mut fully: HashSet<u64> = HashSet::new();
    let mut partially: HashSet<u64> = HashSet::new();

    // Bucket paths by depth. Single-object paths are final already.
    let mut depth_groups: BTreeMap<usize, HashSet<usize>> = BTreeMap::new();
    for (i, seq) in seqs.iter().enumerate() {
        match seq.len() {
            0 => continue,
            1 => {
                fully.insert(seq_hash(seq, 0));
                collapsed.push(seq.clone());
            }
            n => {
                depth_groups.entry(n).or_default().insert(i);
            }
        }
    }

    // Whittle the deepest group down one level at a time. A promoted
    // representative keeps its full tail; prefix hashing makes that
    // harmless.
    while let Some((&plen, _)) = depth_groups.iter().next_back() {
        if plen == 1 {
            break;
        }
        let group = depth_groups.remove(&plen).unwrap();

        let mut grouped: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut pcomb: HashMap<u64, u64> = HashMap::new();
        for idx in group {
            let seq = &seqs[idx];
            let phash = seq_hash(seq, plen - 1);
            grouped.entry(phash).or_default().push(idx);
            pcomb.insert(phash, seq[plen - 2]);
        }

        for (phash, members) in grouped {
            let present: HashSet<u64> =
                members.iter().map(|&i| seqs[i][plen - 1]).collect();

            let complete = match gt.element_children(pcomb[&phash]) {
                Some(children) if !children.is_empty() => {
                    children.iter().all(|c| present.contains(c))
                }
                _ => false,
            };

            // Members are fully drawn at this depth whether or not their
            // parent ends up fully drawn.
            for &idx in &members {
                fully.insert(seq_hash(&seqs[idx], plen));
            }

            if complete {
                depth_groups
                    .entry(plen - 1)
                    .or_default()
                    .insert(members[0]);
            } else {
                for &idx in &members {
                    let trimmed = seqs[idx][..plen].to_vec();
                    for l in 1..plen {
                        partially.insert(seq_hash(&trimmed, l));
                    }
                    collapsed.push(trimmed);
                }
            }
        }
    }

    if let Some(group) = depth_groups.remove(&1) {
        for idx in group {
            let trimmed = seqs[idx][..1].to_vec();
            fully.insert(seq_hash(&trimmed, 0));
            collapsed.push(trimmed);
        }
    }

    (collapsed, fully, partially)
}

// -- SceneDb ---------------------------------------------------------------

/// Top-level registry: the single source of truth for mirrored objects and
/// instances, the registered-path table and pool, all view states and all
/// selection states.
pub struct SceneDb {
    db: Box<dyn GeometryDb>,
    renderer: Box<dyn SceneRenderer>,
    ground: GroundTruth,

    paths: HashMap<u64, ObjPath>,
    pool: Vec<ObjPath>,

    added: HashSet<String>,
    changed: HashSet<String>,
    removed: HashSet<String>,

    default_view: ViewState,
    views: HashMap<String, ViewState>,

    default_selection: Selection,
    selections: HashMap<String, Selection>,

    attr_cache: DiskCache,
    lod: LodCache,
}

impl SceneDb {
    /// Mirror `db` with a process-local attribute cache and kick off the
    /// detached LOD warming pass.
    pub fn open(db: Box<dyn GeometryDb>, renderer: Box<dyn SceneRenderer>) -> Self {
        Self::open_inner(db, renderer, DiskCache::in_memory())
    }

    /// As `open`, but attributes/bounds persist in a cache file across
    /// sessions.
    pub fn open_with_cache(
        db: Box<dyn GeometryDb>,
        renderer: Box<dyn SceneRenderer>,
        cache_path: &std::path::Path,
    ) -> Self {
        Self::open_inner(db, renderer, DiskCache::open(cache_path))
    }

    fn open_inner(
        db: Box<dyn GeometryDb>,
        renderer: Box<dyn SceneRenderer>,
        mut attr_cache: DiskCache,
    ) -> Self {
        let mut ground = GroundTruth::default();
        ground.rebuild(db.as_ref(), &mut attr_cache);
        info!(
            objects = ground.object_count(),
            instances = ground.instance_count(),
            "scene state populated"
        );

        let lod = LodCache::new();
        let seeds: Vec<LodSeed> = ground
            .objects
            .values()
            .filter(|o| !o.is_comb)
            .filter_map(|o| {
                o.bounds.map(|bounds| LodSeed {
                    hash: o.hash,
                    name: o.name.clone(),
                    bounds,
                })
            })
            .collect();
        if !seeds.is_empty() {
            // Best effort: completion is never awaited, results are
            // last-write-wins against foreground computations.
            drop(lod.warm_background(seeds, 1));
        }

        Self {
            db,
            renderer,
            ground,
            paths: HashMap::new(),
            pool: Vec::new(),
            added: HashSet::new(),
            changed: HashSet::new(),
            removed: HashSet::new(),
            default_view: ViewState::new(ViewId::Default),
            views: HashMap::new(),
            default_selection: Selection::new(),
            selections: HashMap::new(),
            attr_cache,
            lod,
        }
    }

    pub fn db(&self) -> &dyn GeometryDb {
        self.db.as_ref()
    }

    pub fn db_mut(&mut self) -> &mut dyn GeometryDb {
        self.db.as_mut()
    }

    pub fn renderer(&self) -> &dyn SceneRenderer {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> &mut dyn SceneRenderer {
        self.renderer.as_mut()
    }

    pub fn ground(&self) -> &GroundTruth {
        &self.ground
    }

    pub fn lod_cache(&self) -> &LodCache {
        &self.lod
    }

    /// LOD record for one solid, computed synchronously on miss.
    pub fn lod(&self, hash: u64, level: u32) -> Option<LodRecord> {
        let obj = self.ground.object(hash)?;
        let bounds = obj.bounds?;
        let seed = LodSeed {
            hash,
            name: obj.name.clone(),
            bounds,
        };
        Some(self.lod.get_or_compute(&seed, level))
    }

    /// Persist the attribute/bounds cache, if it has a backing file.
    pub fn flush_cache(&mut self) -> Result<()> {
        self.attr_cache.flush()
    }

    // -- Change notification -----------------------------------------------

    pub fn note_added(&mut self, name: &str) {
        self.added.insert(name.to_string());
    }

    pub fn note_changed(&mut self, name: &str) {
        self.changed.insert(name.to_string());
    }

    pub fn note_removed(&mut self, name: &str) {
        self.removed.insert(name.to_string());
    }

    /// Drain the notification sets and update the mirror incrementally,
    /// then redraw every view. With all sets empty and `force` false this
    /// is a no-op - a missed notification is a caller bug, not something
    /// sync compensates for. `force` rebuilds the whole mirror from the
    /// database.
    ///
    /// Returns true if any state changed.
    pub fn sync(&mut self, force: bool) -> bool {
        if !force && self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
        {
            return false;
        }

        let mut touched: HashSet<u64> = HashSet::new();

        if force {
            info!("forced full resync");
            self.ground.rebuild(self.db.as_ref(), &mut self.attr_cache);
            touched.extend(self.ground.objects.keys().copied());
            self.added.clear();
            self.changed.clear();
            self.removed.clear();
        } else {
            let removed: Vec<String> = self.removed.drain().collect();
            for name in removed {
                debug!(name = %name, "sync: removed");
                let hash = name_hash(&name);
                touched.extend(self.ground.remove_object(hash));
                self.attr_cache.forget(hash);
                self.lod.forget(hash);
            }

            let added: Vec<String> = self.added.drain().collect();
            for name in added {
                debug!(name = %name, "sync: added");
                if let Some(h) =
                    self.ground
                        .insert_object(self.db.as_ref(), &mut self.attr_cache, &name)
                {
                    touched.insert(h);
                }
            }

            let changed: Vec<String> = self.changed.drain().collect();
            for name in changed {
                debug!(name = %name, "sync: changed");
                let hash = name_hash(&name);
                // Cached values are suspect; re-read from the database.
                self.attr_cache.forget(hash);
                self.lod.forget(hash);
                match self
                    .ground
                    .insert_object(self.db.as_ref(), &mut self.attr_cache, &name)
                {
                    Some(h) => {
                        touched.insert(h);
                    }
                    // Reported changed but no longer resolvable: same as
                    // removed.
                    None => touched.extend(self.ground.remove_object(hash)),
                }
            }
        }

        // Registered paths whose element sequence no longer resolves are
        // invalid, never silently re-pointed.
        let ground = &self.ground;
        self.paths.retain(|_, p| p.valid(ground));

        // Selections revalidate the hard way - an invalid selection is
        // simply gone.
        self.default_selection.refresh(ground);
        for s in self.selections.values_mut() {
            s.refresh(ground);
        }

        // Every view revalidates and rebuilds its drawn sets. No autoview:
        // a database edit must not yank the camera.
        let default_detail = self.effective_detail(&ViewId::Default);
        let named_details: Vec<(String, u32)> = self
            .views
            .keys()
            .map(|n| (n.clone(), self.effective_detail(&ViewId::Named(n.clone()))))
            .collect();

        let ground = &self.ground;
        let renderer = self.renderer.as_mut();
        self.default_view
            .redraw(ground, renderer, &touched, default_detail, false);
        for (name, detail) in named_details {
            if let Some(v) = self.views.get_mut(&name) {
                v.redraw(ground, renderer, &touched, detail, false);
            }
        }

        self.apply_highlights();
        true
    }

    // -- Registered paths --------------------------------------------------

    /// Resolve a path string to its registered path, creating and
    /// registering one if needed. `None` if any component fails to
    /// resolve.
    pub fn get_path(&mut self, path: &str) -> Option<u64> {
        let seq = seq_from_string(&self.ground, path)?;
        let h = seq_hash(&seq, 0);
        if self.paths.contains_key(&h) {
            return Some(h);
        }
        let p = self.build_path(&seq)?;
        self.paths.insert(h, p);
        Some(h)
    }

    /// Shared read access to a registered path.
    pub fn path(&self, hash: u64) -> Option<&ObjPath> {
        self.paths.get(&hash)
    }

    /// Remove a path from the registry for mutation. Re-register with
    /// `register_path` when done - mutation changes the hash, so the old
    /// registration would be stale anyway.
    pub fn take_path(&mut self, hash: u64) -> Option<ObjPath> {
        self.paths.remove(&hash)
    }

    /// (Re-)register a path under its current hash. An existing entry for
    /// that hash is recycled into the pool.
    pub fn register_path(&mut self, p: ObjPath) -> u64 {
        let h = p.hash();
        if let Some(old) = self.paths.insert(h, p) {
            self.recycle(old);
        }
        h
    }

    /// Return a path container to the reuse pool.
    pub fn put_path(&mut self, p: ObjPath) {
        self.recycle(p);
    }

    pub fn registered_path_count(&self) -> usize {
        self.paths.len()
    }

    /// Display string for a registered path.
    pub fn path_string(&self, hash: u64) -> Option<String> {
        self.paths
            .get(&hash)
            .map(|p| p.path_str(&self.ground))
    }

    fn recycle(&mut self, mut p: ObjPath) {
        p.reset();
        self.pool.push(p);
    }

    fn build_path(&mut self, seq: &[u64]) -> Option<ObjPath> {
        let mut p = self.pool.pop().unwrap_or_default();
        p.reset();
        for e in seq {
            if p.push_unchecked(&self.ground, *e).is_none() {
                self.recycle(p);
                return None;
            }
        }
        if p.is_empty() {
            self.recycle(p);
            return None;
        }
        Some(p)
    }

    // -- Tree algorithms ---------------------------------------------------

    /// Expand registered paths to the union of their leaf paths. A leaf
    /// reachable under two input ancestors yields two distinct paths.
    /// With `create`, every result is registered so the returned hashes
    /// all resolve through `path()`.
    pub fn expand_paths(&mut self, paths: &[u64], create: bool) -> Vec<u64> {
        let mut out_seqs: Vec<Vec<u64>> = Vec::new();
        for h in paths {
            let Some(p) = self.paths.get(h) else {
                continue;
            };
            if p.is_empty() {
                continue;
            }
            let mut seq = p.elements().to_vec();
            expand_seq(&self.ground, &mut seq, &mut out_seqs);
        }
        self.intern_seqs(out_seqs, create)
    }

    /// Collapse registered paths to the shallowest ancestors whose
    /// expansion exactly reproduces the input set.
    pub fn collapse_paths(&mut self, paths: &[u64], create: bool) -> Vec<u64> {
        let seqs: Vec<Vec<u64>> = paths
            .iter()
            .filter_map(|h| self.paths.get(h))
            .filter(|p| !p.is_empty())
            .map(|p| p.elements().to_vec())
            .collect();
        let (collapsed, _, _) = collapse_seqs(&self.ground, &seqs);
        self.intern_seqs(collapsed, create)
    }

    fn intern_seqs(&mut self, seqs: Vec<Vec<u64>>, create: bool) -> Vec<u64> {
        let mut ret = Vec::with_capacity(seqs.len());
        for seq in seqs {
            let h = seq_hash(&seq, 0);
            if create && !self.paths.contains_key(&h) {
                if let Some(p) = self.build_path(&seq) {
                    self.paths.insert(h, p);
                }
            }
            ret.push(h);
        }
        ret
    }

    /// Add the hashes of ALL paths below the registered path `phash`
    /// (intermediates included) to `set`. Pure membership bookkeeping - no
    /// path containers are materialized unless `create_paths` is set.
    pub fn add_paths_below(&mut self, set: &mut HashSet<u64>, phash: u64, create_paths: bool) {
        let Some(p) = self.paths.get(&phash) else {
            return;
        };
        if p.is_empty() {
            return;
        }
        let mut seq = p.elements().to_vec();
        collect_below(&self.ground, &mut seq, set);

        if create_paths {
            let mut leaves = Vec::new();
            let mut seq = seq.clone();
            expand_seq(&self.ground, &mut seq, &mut leaves);
            self.intern_seqs(leaves, true);
        }
    }

    /// Remove the hashes of all paths below `phash` from `set`.
    pub fn remove_paths_below(&mut self, set: &mut HashSet<u64>, phash: u64) {
        let Some(p) = self.paths.get(&phash) else {
            return;
        };
        if p.is_empty() {
            return;
        }
        let mut seq = p.elements().to_vec();
        clear_below(&self.ground, &mut seq, set);
    }

    /// Object keys with no incoming instance references, in natural name
    /// order - the root set for populating a fresh scene. Objects only
    /// reachable through a cycle are appended when `show_cyclic` is set.
    pub fn tops(&self, show_cyclic: bool) -> Vec<u64> {
        let referenced: HashSet<u64> = self
            .ground
            .instances
            .values()
            .map(|i| i.child_hash)
            .collect();

        let mut roots: Vec<(&str, u64)> = self
            .ground
            .objects
            .values()
            .filter(|o| !referenced.contains(&o.hash))
            .map(|o| (o.name.as_str(), o.hash))
            .collect();
        roots.sort_by(|a, b| natural_cmp(a.0, b.0));
        let mut ret: Vec<u64> = roots.iter().map(|r| r.1).collect();

        if show_cyclic {
            let mut cyclic: HashSet<u64> = HashSet::new();
            let mut stack: Vec<u64> = Vec::new();
            for &(_, h) in &roots {
                gather_cyclic(&self.ground, &mut cyclic, h, &mut stack);
            }
            let mut extra: Vec<(&str, u64)> = cyclic
                .into_iter()
                .filter_map(|h| self.ground.object(h).map(|o| (o.name.as_str(), h)))
                .collect();
            extra.sort_by(|a, b| natural_cmp(a.0, b.0));
            ret.extend(extra.into_iter().map(|e| e.1));
        }

        ret
    }

    // -- Views -------------------------------------------------------------

    pub fn default_view(&self) -> &ViewState {
        &self.default_view
    }

    pub fn default_view_mut(&mut self) -> &mut ViewState {
        &mut self.default_view
    }

    /// Named view, lazily created.
    pub fn add_view(&mut self, name: &str) -> &mut ViewState {
        self.views
            .entry(name.to_string())
            .or_insert_with(|| ViewState::new(ViewId::Named(name.to_string())))
    }

    pub fn view(&self, id: &ViewId) -> Option<&ViewState> {
        match id {
            ViewId::Default => Some(&self.default_view),
            ViewId::Named(n) => self.views.get(n),
        }
    }

    pub fn view_mut(&mut self, id: &ViewId) -> Option<&mut ViewState> {
        match id {
            ViewId::Default => Some(&mut self.default_view),
            ViewId::Named(n) => self.views.get_mut(n),
        }
    }

    /// Destroy a named view, releasing its scene objects.
    pub fn remove_view(&mut self, name: &str) -> bool {
        match self.views.remove(name) {
            Some(mut v) => {
                v.clear(self.renderer.as_mut());
                true
            }
            None => false,
        }
    }

    /// Named views matching a glob pattern (`None` = all), sorted.
    pub fn find_views(&self, pattern: Option<&str>) -> Vec<String> {
        let matcher = pattern.and_then(|p| glob::Pattern::new(p).ok());
        if pattern.is_some() && matcher.is_none() {
            return Vec::new();
        }
        let mut names: Vec<String> = self
            .views
            .keys()
            .filter(|n| matcher.as_ref().map_or(true, |m| m.matches(n)))
            .cloned()
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    /// Stage a path for drawing in a view. Takes effect at the next
    /// `redraw`.
    pub fn add_path(
        &mut self,
        view: &ViewId,
        path: &str,
        mode: DrawMode,
        settings: DrawSettings,
    ) -> bool {
        let Some(seq) = seq_from_string(&self.ground, path) else {
            return false;
        };
        let Some(v) = self.view_mut_inner(view) else {
            return false;
        };
        v.stage(seq, mode, settings);
        true
    }

    /// Erase a path (and, for un-evaluated modes, everything drawn under
    /// it) from a view. `None` mode erases across all modes.
    pub fn remove_path(&mut self, view: &ViewId, path: &str, mode: Option<DrawMode>) -> bool {
        let Some(seq) = seq_from_string(&self.ground, path) else {
            return false;
        };
        let ground = &self.ground;
        let renderer = self.renderer.as_mut();
        let v = match view {
            ViewId::Default => &mut self.default_view,
            ViewId::Named(n) => match self.views.get_mut(n) {
                Some(v) => v,
                None => return false,
            },
        };
        v.remove_path(ground, renderer, &seq, mode)
    }

    /// Drawn status of a path in a view, consulting the link target when
    /// the view itself does not draw it.
    pub fn is_drawn(&self, view: &ViewId, phash: u64, mode: Option<DrawMode>) -> DrawnStatus {
        let Some(v) = self.view(view) else {
            return DrawnStatus::NotDrawn;
        };
        let local = v.is_drawn(phash, mode);
        if local != DrawnStatus::NotDrawn {
            return local;
        }
        // One level of link following - link chains are not walked.
        match v.link_paths() {
            Some(target) if target != view => match self.view(target) {
                Some(t) => t.is_drawn(phash, mode),
                None => DrawnStatus::NotDrawn,
            },
            _ => DrawnStatus::NotDrawn,
        }
    }

    /// Revalidate and rebuild drawn state for `view` (default when `None`)
    /// and every view linked to it. Does not touch pixels.
    pub fn redraw(&mut self, view: Option<&ViewId>, autoview: bool) {
        let target = view.cloned().unwrap_or(ViewId::Default);

        let mut ids: Vec<ViewId> = vec![target.clone()];
        if self.default_view.link_paths() == Some(&target) {
            ids.push(ViewId::Default);
        }
        for (name, v) in &self.views {
            if v.link_paths() == Some(&target) {
                ids.push(ViewId::Named(name.clone()));
            }
        }

        let details: Vec<(ViewId, u32)> = ids
            .iter()
            .map(|id| (id.clone(), self.effective_detail(id)))
            .collect();

        let untouched: HashSet<u64> = HashSet::new();
        for (id, detail) in details {
            let ground = &self.ground;
            let renderer = self.renderer.as_mut();
            let v = match &id {
                ViewId::Default => Some(&mut self.default_view),
                ViewId::Named(n) => self.views.get_mut(n),
            };
            if let Some(v) = v {
                v.redraw(ground, renderer, &untouched, detail, autoview);
            }
        }

        self.apply_highlights();
    }

    /// Present `view`: forward every visible handle (local and linked) to
    /// the renderer. Assumes `redraw` already ran this cycle.
    pub fn render(&mut self, view: &ViewId) {
        let extra = self.linked_handles(view);
        let renderer = self.renderer.as_mut();
        let v = match view {
            ViewId::Default => Some(&mut self.default_view),
            ViewId::Named(n) => self.views.get_mut(n),
        };
        if let Some(v) = v {
            v.render(renderer, &extra);
        }
    }

    /// Link `from` to source drawn paths (or, with `view_objs`, non-path
    /// scene objects) from `to`. One-directional; never undone implicitly.
    pub fn link_views(&mut self, from: &ViewId, to: &ViewId, view_objs: bool) -> bool {
        if from == to || self.view(to).is_none() {
            return false;
        }
        match self.view_mut_inner(from) {
            Some(v) => {
                v.link(to.clone(), view_objs);
                true
            }
            None => false,
        }
    }

    pub fn unlink_views(&mut self, from: &ViewId, view_objs: bool) -> bool {
        match self.view_mut_inner(from) {
            Some(v) => v.unlink(view_objs),
            None => false,
        }
    }

    /// Link-aware emptiness of a view.
    pub fn view_empty(&self, id: &ViewId) -> bool {
        let Some(v) = self.view(id) else {
            return true;
        };
        if !v.empty() {
            return false;
        }
        match v.link_paths() {
            Some(target) if target != id => self
                .view(target)
                .map(|t| t.empty())
                .unwrap_or(true),
            _ => true,
        }
    }

    /// Record per-view emptiness at the start of a draw cycle so redraw
    /// knows whether an autoview is warranted.
    pub fn flag_empty(&mut self) {
        let mut flags: Vec<(ViewId, bool)> = vec![(ViewId::Default, self.view_empty(&ViewId::Default))];
        for name in self.views.keys() {
            let id = ViewId::Named(name.clone());
            flags.push((id.clone(), self.view_empty(&id)));
        }
        for (id, empty) in flags {
            if let Some(v) = self.view_mut_inner(&id) {
                v.flag_empty(empty);
            }
        }
    }

    /// Scene handles visible in a view: its own drawn paths and view
    /// objects plus those of its link targets, optionally glob-filtered by
    /// display name.
    pub fn find_scene_objs(&self, view: &ViewId, pattern: Option<&str>) -> Vec<SceneHandle> {
        let Some(v) = self.view(view) else {
            return Vec::new();
        };
        let mut out = v.find_scene_objs(&self.ground, pattern, true, true);
        out.extend(self.linked_filtered(view, pattern));
        out.sort();
        out.dedup();
        out
    }

    /// The level of detail a view's shared geometry must carry. The
    /// default view aggregates across every view linked to it so each
    /// linker renders at no less detail than it individually requires;
    /// a view linked to a non-default view inherits that view's level.
    pub fn effective_detail(&self, id: &ViewId) -> u32 {
        let mut aggregated = self.default_view.camera.detail_level;
        for v in self.views.values() {
            if v.link_paths() == Some(&ViewId::Default) {
                aggregated = aggregated.max(v.camera.detail_level);
            }
        }
        match id {
            ViewId::Default => aggregated,
            ViewId::Named(n) => {
                let Some(v) = self.views.get(n) else {
                    return 0;
                };
                match v.link_paths() {
                    Some(ViewId::Default) => aggregated,
                    Some(ViewId::Named(t)) => self
                        .views
                        .get(t)
                        .map(|tv| tv.camera.detail_level)
                        .unwrap_or(v.camera.detail_level),
                    None => v.camera.detail_level,
                }
            }
        }
    }

    fn view_mut_inner(&mut self, id: &ViewId) -> Option<&mut ViewState> {
        match id {
            ViewId::Default => Some(&mut self.default_view),
            ViewId::Named(n) => self.views.get_mut(n),
        }
    }

    fn linked_handles(&self, view: &ViewId) -> Vec<SceneHandle> {
        self.linked_filtered(view, None)
    }

    fn linked_filtered(&self, view: &ViewId, pattern: Option<&str>) -> Vec<SceneHandle> {
        let Some(v) = self.view(view) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if let Some(target) = v.link_paths() {
            if target != view {
                if let Some(t) = self.view(target) {
                    out.extend(t.find_scene_objs(&self.ground, pattern, true, false));
                }
            }
        }
        if let Some(target) = v.link_objs() {
            if target != view {
                if let Some(t) = self.view(target) {
                    out.extend(t.find_scene_objs(&self.ground, pattern, false, true));
                }
            }
        }
        out
    }

    /// Illuminate drawn scene objects that fall inside the default
    /// selection, and clear illumination on those that do not.
    fn apply_highlights(&mut self) {
        let selection = &self.default_selection;
        let renderer = self.renderer.as_mut();
        let views = std::iter::once(&self.default_view).chain(self.views.values());
        for v in views {
            for (phash, modes) in v.scene_objs() {
                let on = selection.is_active(*phash) || selection.is_selected(*phash);
                for h in modes.values() {
                    renderer.highlight(*h, on);
                }
            }
        }
    }

    // -- Selections --------------------------------------------------------

    pub fn selection(&self) -> &Selection {
        &self.default_selection
    }

    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.default_selection
    }

    /// Named selection set, lazily created. `None` is the default set.
    pub fn selection_set(&mut self, name: Option<&str>) -> &mut Selection {
        match name {
            None => &mut self.default_selection,
            Some(n) => self
                .selections
                .entry(n.to_string())
                .or_insert_with(Selection::new),
        }
    }

    /// Remove a named selection set; `None` resets the default set
    /// instead of removing it.
    pub fn remove_selection_set(&mut self, name: Option<&str>) {
        match name {
            None => self.default_selection.clear(),
            Some(n) => {
                self.selections.remove(n);
            }
        }
    }

    /// Names of selection sets matching a glob pattern, sorted.
    pub fn find_selection_sets(&self, pattern: Option<&str>) -> Vec<String> {
        let matcher = pattern.and_then(|p| glob::Pattern::new(p).ok());
        if pattern.is_some() && matcher.is_none() {
            return Vec::new();
        }
        let mut names: Vec<String> = self
            .selections
            .keys()
            .filter(|n| matcher.as_ref().map_or(true, |m| m.matches(n)))
            .cloned()
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    /// Select a path (by string) in the default selection set.
    pub fn select(&mut self, path: &str) -> bool {
        let Some(seq) = seq_from_string(&self.ground, path) else {
            return false;
        };
        self.default_selection.select(&self.ground, &seq)
    }

    /// Deselect a path (by string) in the default selection set.
    pub fn deselect(&mut self, path: &str) -> bool {
        let Some(seq) = seq_from_string(&self.ground, path) else {
            return false;
        };
        self.default_selection.deselect(&self.ground, &seq)
    }

    // -- Diagnostics -------------------------------------------------------

    /// JSON summary of the current state - hash maps are opaque in logs,
    /// so decode the interesting counts and drawn paths.
    pub fn dump_state(&self) -> Result<String> {
        let mut views = serde_json::Map::new();
        let mut describe = |name: String, v: &ViewState| {
            views.insert(
                name,
                json!({
                    "drawn": v.drawn_paths(&self.ground, None, true),
                    "scene_objs": v.scene_obj_count(),
                    "linked": v.link_paths().map(|t| t.to_string()),
                }),
            );
        };
        describe("(default)".to_string(), &self.default_view);
        for (name, v) in &self.views {
            describe(name.clone(), v);
        }

        let summary = json!({
            "objects": self.ground.object_count(),
            "instances": self.ground.instance_count(),
            "registered_paths": self.paths.len(),
            "pooled_paths": self.pool.len(),
            "views": serde_json::Value::Object(views),
            "selected": self.default_selection.find_selected(&self.ground, None),
        });
        Ok(serde_json::to_string_pretty(&summary)?)
    }
}

/// Depth-first walk from a root object recording every object at which a
/// walk revisits its own ancestry.
fn gather_cyclic(gt: &GroundTruth, cyclic: &mut HashSet<u64>, ohash: u64, stack: &mut Vec<u64>) {
    if stack.contains(&ohash) {
        cyclic.insert(ohash);
        return;
    }
    stack.push(ohash);
    if let Some(obj) = gt.object(ohash) {
        for ih in &obj.instances {
            if let Some(inst) = gt.instance(*ih) {
                gather_cyclic(gt, cyclic, inst.child_hash, stack);
            }
        }
    }
    stack.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BoolOp, MemoryDb, TreeEntry};
    use crate::scene::RecordingRenderer;

    fn scene(db: MemoryDb) -> SceneDb {
        SceneDb::open(Box::new(db), Box::new(RecordingRenderer::new()))
    }

    fn test_db() -> MemoryDb {
        let mut db = MemoryDb::new();
        db.add_solid("c.s");
        db.add_solid("d.s");
        db.add_comb(
            "b",
            vec![
                TreeEntry::new("c.s"),
                TreeEntry::new("d.s").op(BoolOp::Subtract),
            ],
        );
        db.add_union_comb("a", &["b"]);
        db
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("s2", "s10"), Ordering::Less);
        assert_eq!(natural_cmp("s10", "s2"), Ordering::Greater);
        assert_eq!(natural_cmp("s02", "s2"), Ordering::Greater);
        assert_eq!(natural_cmp("abc", "abd"), Ordering::Less);
        assert_eq!(natural_cmp("a", "a"), Ordering::Equal);
        assert_eq!(natural_cmp("a1b2", "a1b10"), Ordering::Less);
    }

    #[test]
    fn test_get_path_registers_once() {
        let mut s = scene(test_db());
        let h1 = s.get_path("a/b/c.s").unwrap();
        let h2 = s.get_path("a/b/c.s").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(s.registered_path_count(), 1);
        assert_eq!(s.path_string(h1).unwrap(), "a/b/c.s");
        assert!(s.get_path("a/nothing").is_none());
    }

    #[test]
    fn test_take_mutate_reregister() {
        let mut s = scene(test_db());
        let h = s.get_path("a/b").unwrap();
        let mut p = s.take_path(h).unwrap();
        assert!(s.path(h).is_none(), "membership dropped while mutating");

        let leaf = crate::hash::pair_hash(name_hash("b"), name_hash("c.s"));
        p.push(s.ground(), leaf).unwrap();
        let h2 = s.register_path(p);
        assert_ne!(h, h2);
        assert_eq!(s.path_string(h2).unwrap(), "a/b/c.s");
    }

    #[test]
    fn test_pool_reuse() {
        let mut s = scene(test_db());
        let h = s.get_path("a/b").unwrap();
        let p = s.take_path(h).unwrap();
        s.put_path(p);
        // Next build drains the pool rather than allocating.
        let before = s.pool.len();
        let _ = s.get_path("a/b/c.s").unwrap();
        assert_eq!(s.pool.len(), before - 1);
    }

    #[test]
    fn test_expand_collapse_round_trip() {
        let mut s = scene(test_db());
        let root = s.get_path("a").unwrap();

        let leaves = s.expand_paths(&[root], true);
        let mut strs: Vec<String> =
            leaves.iter().map(|h| s.path_string(*h).unwrap()).collect();
        strs.sort();
        assert_eq!(strs, vec!["a/b/c.s", "a/b/d.s"]);

        let collapsed = s.collapse_paths(&leaves, true);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(s.path_string(collapsed[0]).unwrap(), "a");
    }

    #[test]
    fn test_collapse_refuses_partial_sets() {
        let mut s = scene(test_db());
        let one = s.get_path("a/b/c.s").unwrap();
        // Only one of b's two children: must NOT summarize as a or a/b.
        let collapsed = s.collapse_paths(&[one], true);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(s.path_string(collapsed[0]).unwrap(), "a/b/c.s");
    }

    #[test]
    fn test_expand_distinct_under_distinct_ancestors() {
        let mut db = test_db();
        db.add_union_comb("a2", &["b"]);
        let mut s = scene(db);
        let p1 = s.get_path("a").unwrap();
        let p2 = s.get_path("a2").unwrap();
        let leaves = s.expand_paths(&[p1, p2], true);
        assert_eq!(leaves.len(), 4);
        let set: HashSet<u64> = leaves.iter().copied().collect();
        assert_eq!(set.len(), 4, "same leaf under two ancestors stays distinct");
    }

    #[test]
    fn test_paths_below_membership() {
        let mut s = scene(test_db());
        let root = s.get_path("a").unwrap();
        let mut set = HashSet::new();
        s.add_paths_below(&mut set, root, false);

        let ab = s.get_path("a/b").unwrap();
        let abc = s.get_path("a/b/c.s").unwrap();
        assert!(set.contains(&root));
        assert!(set.contains(&ab));
        assert!(set.contains(&abc));
        assert_eq!(set.len(), 4);

        s.remove_paths_below(&mut set, ab);
        assert!(set.contains(&root));
        assert!(!set.contains(&ab));
        assert!(!set.contains(&abc));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_tops() {
        let mut db = test_db();
        db.add_solid("floating.s");
        let s = scene(db);

        let tops = s.tops(false);
        let names: Vec<String> = tops
            .iter()
            .map(|h| s.ground().object(*h).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["a", "floating.s"]);
    }

    #[test]
    fn test_tops_cyclic() {
        let mut db = MemoryDb::new();
        db.add_union_comb("top", &["loop_a"]);
        db.add_union_comb("loop_a", &["loop_b"]);
        db.add_union_comb("loop_b", &["loop_a"]);
        let s = scene(db);

        let plain = s.tops(false);
        assert_eq!(plain.len(), 1);
        assert_eq!(s.ground().object(plain[0]).unwrap().name, "top");

        let with_cyclic = s.tops(true);
        assert_eq!(with_cyclic.len(), 2);
        assert_eq!(s.ground().object(with_cyclic[1]).unwrap().name, "loop_a");
    }

    #[test]
    fn test_sync_noop_without_notifications() {
        let mut s = scene(test_db());
        assert!(!s.sync(false));
        assert!(s.sync(true), "forced sync always runs");
        assert!(!s.sync(false));
    }

    #[test]
    fn test_sync_removal_cascades_to_paths() {
        let mut s = scene(test_db());
        let h = s.get_path("a/b/c.s").unwrap();
        assert!(s.path(h).is_some());

        s.db_mut()
            .as_any_mut()
            .downcast_mut::<MemoryDb>()
            .unwrap()
            .remove("c.s");
        s.note_removed("c.s");
        assert!(s.sync(false));

        assert!(s.path(h).is_none(), "registered path dropped");
        assert!(s.get_path("a/b/c.s").is_none(), "no longer resolvable");
        // Sibling path still fine
        assert!(s.get_path("a/b/d.s").is_some());
    }

    #[test]
    fn test_sync_change_regenerates_instances() {
        let mut s = scene(test_db());
        let h_old = s.get_path("a/b/c.s").unwrap();

        // b's tree changes: c.s out, d.s stays
        {
            let db = s.db_mut().as_any_mut().downcast_mut::<MemoryDb>().unwrap();
            db.add_comb("b", vec![TreeEntry::new("d.s")]);
        }
        s.note_changed("b");
        assert!(s.sync(false));

        assert!(s.path(h_old).is_none(), "stale instance invalidates path");
        assert!(s.get_path("a/b/c.s").is_none());
        let h_new = s.get_path("a/b/d.s").unwrap();
        assert_eq!(s.path_string(h_new).unwrap(), "a/b/d.s");
    }

    #[test]
    fn test_sync_idempotent() {
        let mut s = scene(test_db());
        s.db_mut()
            .as_any_mut()
            .downcast_mut::<MemoryDb>()
            .unwrap()
            .remove("d.s");
        s.note_removed("d.s");
        assert!(s.sync(false));
        assert!(!s.sync(false), "second sync with no notifications is a no-op");
    }

    #[test]
    fn test_dump_state_is_json() {
        let mut s = scene(test_db());
        let _ = s.get_path("a/b/c.s");
        let dump = s.dump_state().unwrap();
        let v: serde_json::Value = serde_json::from_str(&dump).unwrap();
        assert_eq!(v["objects"], 4);
        assert_eq!(v["registered_paths"], 1);
    }
}
