//! Per-view drawn-state bookkeeping.
//!
//! A `ViewState` decides which paths one rendering surface shows at which
//! drawing modes and keeps their renderer handles current. Paths are
//! staged by `add_path`, expanded to leaves (or kept exact, for evaluated
//! modes) during `redraw`, and the collapsed fully/partially-drawn sets
//! are rebuilt after every membership change so `is_drawn` is a hash
//! lookup, not a tree walk.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use glam::{DMat4, DVec3};
use tracing::{debug, warn};

use crate::db::BoolOp;
use crate::geom::Aabb;
use crate::hash::{data_hash, name_hash, seq_hash, set_hash};
use crate::scene::{DrawMode, SceneHandle, SceneObjRequest, SceneRenderer};
use crate::state::collapse_seqs;
use crate::state::object::GroundTruth;
use crate::state::path::{
    elem_obj, seq_addition_cyclic, seq_bbox, seq_color, seq_from_string, seq_has_op,
    seq_matrix, seq_to_string, seq_valid, DrawSettings,
};

/// View identity: the always-present default view, or an application-named
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewId {
    Default,
    Named(String),
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewId::Default => write!(f, "(default)"),
            ViewId::Named(n) => write!(f, "{}", n),
        }
    }
}

/// Result of a drawn-state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawnStatus {
    NotDrawn,
    /// The path and its entire subtree are visualized.
    Drawn,
    /// Some but not all of the paths below this one are visualized.
    PartiallyDrawn,
}

/// Camera/display block hashed for dirty detection. The scene layer does
/// not interpret these beyond `detail_level`; applications update them and
/// `dirty()` notices.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub width: u32,
    pub height: u32,
    pub center: DVec3,
    pub scale: f64,
    /// Level of detail this view needs for adaptive geometry.
    pub detail_level: u32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            center: DVec3::ZERO,
            scale: 1.0,
            detail_level: 0,
        }
    }
}

impl Camera {
    fn state_hash(&self) -> u64 {
        let mut buf = Vec::with_capacity(44);
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.center.x.to_le_bytes());
        buf.extend_from_slice(&self.center.y.to_le_bytes());
        buf.extend_from_slice(&self.center.z.to_le_bytes());
        buf.extend_from_slice(&self.scale.to_le_bytes());
        buf.extend_from_slice(&self.detail_level.to_le_bytes());
        data_hash(&buf)
    }
}

/// Drawn-path and scene-object state for one rendering surface.
pub struct ViewState {
    id: ViewId,

    /// Paths queued by add_path, expanded at the next redraw.
    staged: Vec<(Vec<u64>, DrawMode, DrawSettings)>,
    /// Settings recorded per explicitly-added path, so re-expansion after
    /// a database change keeps user overrides.
    added_settings: HashMap<(u64, DrawMode), DrawSettings>,

    /// Leaf path hash -> element sequence, for every materialized path.
    scene_keys: HashMap<u64, Vec<u64>>,
    /// Leaf path hash -> per-mode renderer handles.
    scene_objs: HashMap<u64, BTreeMap<DrawMode, SceneHandle>>,
    /// Leaf path hash -> per-mode settings used at materialize time.
    leaf_settings: HashMap<u64, BTreeMap<DrawMode, DrawSettings>>,

    /// Collapsed drawn-path lists, per mode and mode-agnostic.
    mode_collapsed: HashMap<DrawMode, Vec<Vec<u64>>>,
    all_collapsed: Vec<Vec<u64>>,
    /// Fully/partially drawn hash sets rebuilt by the collapse pass.
    drawn: HashMap<DrawMode, HashSet<u64>>,
    partially: HashMap<DrawMode, HashSet<u64>>,
    all_drawn: HashSet<u64>,
    all_partially: HashSet<u64>,

    /// Non-database scene objects (annotations, construction geometry),
    /// keyed by unique name.
    view_objs: HashMap<String, SceneHandle>,

    /// One-directional sourcing of drawn paths / view objects from
    /// another view. Never cleared implicitly.
    link_paths: Option<ViewId>,
    link_objs: Option<ViewId>,

    pub camera: Camera,

    was_empty: bool,
    old_view_hash: u64,
    old_objs_hash: u64,
}

impl ViewState {
    pub fn new(id: ViewId) -> Self {
        Self {
            id,
            staged: Vec::new(),
            added_settings: HashMap::new(),
            scene_keys: HashMap::new(),
            scene_objs: HashMap::new(),
            leaf_settings: HashMap::new(),
            mode_collapsed: HashMap::new(),
            all_collapsed: Vec::new(),
            drawn: HashMap::new(),
            partially: HashMap::new(),
            all_drawn: HashSet::new(),
            all_partially: HashSet::new(),
            view_objs: HashMap::new(),
            link_paths: None,
            link_objs: None,
            camera: Camera::default(),
            was_empty: true,
            old_view_hash: 0,
            old_objs_hash: 0,
        }
    }

    pub fn id(&self) -> &ViewId {
        &self.id
    }

    // -- Membership changes ------------------------------------------------

    /// Stage a path (by string) for drawing. Membership takes effect at
    /// the next `redraw`.
    pub fn add_path(
        &mut self,
        gt: &GroundTruth,
        path: &str,
        mode: DrawMode,
        settings: DrawSettings,
    ) -> bool {
        match seq_from_string(gt, path) {
            Some(seq) => {
                self.stage(seq, mode, settings);
                true
            }
            None => false,
        }
    }

    pub(crate) fn stage(&mut self, seq: Vec<u64>, mode: DrawMode, settings: DrawSettings) {
        self.staged.push((seq, mode, settings));
    }

    /// Erase drawn paths. For un-evaluated modes every materialized path
    /// under `seq` goes; for evaluated modes only an exact match goes.
    /// `None` erases across all modes. Removing a strict subset of a
    /// fully-drawn comb leaves the rest drawn - the comb shows up as
    /// partially drawn after the collapse pass, it is not deleted
    /// outright.
    pub fn remove_path(
        &mut self,
        gt: &GroundTruth,
        renderer: &mut dyn SceneRenderer,
        seq: &[u64],
        mode: Option<DrawMode>,
    ) -> bool {
        if seq.is_empty() {
            return false;
        }

        let exact_only = mode.map_or(false, |m| m.is_evaluated());
        let matches: Vec<u64> = self
            .scene_keys
            .iter()
            .filter(|(_, chashes)| {
                if exact_only {
                    chashes.len() == seq.len() && chashes[..] == seq[..]
                } else {
                    chashes.len() >= seq.len() && chashes[..seq.len()] == seq[..]
                }
            })
            .map(|(phash, _)| *phash)
            .collect();

        let mut removed = false;
        for phash in matches {
            match mode {
                None => {
                    if let Some(modes) = self.scene_objs.remove(&phash) {
                        for h in modes.values() {
                            renderer.release(*h);
                        }
                        removed = true;
                    }
                    self.scene_keys.remove(&phash);
                    self.leaf_settings.remove(&phash);
                }
                Some(m) => {
                    if let Some(modes) = self.scene_objs.get_mut(&phash) {
                        if let Some(h) = modes.remove(&m) {
                            renderer.release(h);
                            removed = true;
                        }
                        if modes.is_empty() {
                            self.scene_objs.remove(&phash);
                            self.scene_keys.remove(&phash);
                            self.leaf_settings.remove(&phash);
                        } else if let Some(ls) = self.leaf_settings.get_mut(&phash) {
                            ls.remove(&m);
                        }
                    }
                }
            }
        }

        // The erased path no longer counts as an explicit add.
        let shash = seq_hash(seq, 0);
        match mode {
            None => {
                self.added_settings.retain(|(h, _), _| *h != shash);
                self.staged
                    .retain(|(s, _, _)| !(s.len() >= seq.len() && s[..seq.len()] == seq[..]));
            }
            Some(m) => {
                self.added_settings.remove(&(shash, m));
                self.staged.retain(|(s, sm, _)| {
                    *sm != m || !(s.len() >= seq.len() && s[..seq.len()] == seq[..])
                });
            }
        }

        if removed {
            self.cache_collapsed(gt);
        }
        removed
    }

    // -- Queries -----------------------------------------------------------

    /// Drawn status from the sets built by the last collapse pass.
    /// `None` mode unions across all modes.
    pub fn is_drawn(&self, phash: u64, mode: Option<DrawMode>) -> DrawnStatus {
        match mode {
            None => {
                if self.all_drawn.contains(&phash) {
                    DrawnStatus::Drawn
                } else if self.all_partially.contains(&phash) {
                    DrawnStatus::PartiallyDrawn
                } else {
                    DrawnStatus::NotDrawn
                }
            }
            Some(m) => {
                if self.drawn.get(&m).map_or(false, |s| s.contains(&phash)) {
                    DrawnStatus::Drawn
                } else if self
                    .partially
                    .get(&m)
                    .map_or(false, |s| s.contains(&phash))
                {
                    DrawnStatus::PartiallyDrawn
                } else {
                    DrawnStatus::NotDrawn
                }
            }
        }
    }

    /// Sorted display strings of drawn paths. `collapsed` lists the
    /// shallowest summarizing set; otherwise every materialized leaf.
    pub fn drawn_paths(
        &self,
        gt: &GroundTruth,
        mode: Option<DrawMode>,
        collapsed: bool,
    ) -> Vec<String> {
        let mut out: Vec<String> = match (mode, collapsed) {
            (None, true) => self
                .all_collapsed
                .iter()
                .map(|s| seq_to_string(gt, s, 0))
                .collect(),
            (Some(m), true) => self
                .mode_collapsed
                .get(&m)
                .map(|seqs| seqs.iter().map(|s| seq_to_string(gt, s, 0)).collect())
                .unwrap_or_default(),
            (None, false) => self
                .scene_keys
                .values()
                .map(|s| seq_to_string(gt, s, 0))
                .collect(),
            (Some(m), false) => self
                .scene_objs
                .iter()
                .filter(|(_, modes)| modes.contains_key(&m))
                .filter_map(|(phash, _)| self.scene_keys.get(phash))
                .map(|s| seq_to_string(gt, s, 0))
                .collect(),
        };
        out.sort_by(|a, b| crate::state::natural_cmp(a, b));
        out
    }

    pub fn drawn_path_count(&self, mode: Option<DrawMode>, collapsed: bool) -> usize {
        match (mode, collapsed) {
            (None, true) => self.all_collapsed.len(),
            (Some(m), true) => self.mode_collapsed.get(&m).map_or(0, |s| s.len()),
            (None, false) => self.scene_keys.len(),
            (Some(m), false) => self
                .scene_objs
                .values()
                .filter(|modes| modes.contains_key(&m))
                .count(),
        }
    }

    /// Renderer handle for one drawn path at one mode.
    pub fn scene_handle(&self, phash: u64, mode: DrawMode) -> Option<SceneHandle> {
        self.scene_objs.get(&phash)?.get(&mode).copied()
    }

    pub(crate) fn scene_objs(&self) -> &HashMap<u64, BTreeMap<DrawMode, SceneHandle>> {
        &self.scene_objs
    }

    pub fn scene_obj_count(&self) -> usize {
        self.scene_objs.values().map(|m| m.len()).sum()
    }

    /// Handles for this view's own content, optionally filtered by a glob
    /// over display names. An unparsable pattern matches nothing.
    pub fn find_scene_objs(
        &self,
        gt: &GroundTruth,
        pattern: Option<&str>,
        db_paths: bool,
        view_objs: bool,
    ) -> Vec<SceneHandle> {
        let matcher = match pattern {
            Some(p) => match glob::Pattern::new(p) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("bad scene object pattern '{}': {}", p, e);
                    return Vec::new();
                }
            },
            None => None,
        };

        let mut out = Vec::new();
        if db_paths {
            for (phash, modes) in &self.scene_objs {
                if let Some(m) = &matcher {
                    let Some(seq) = self.scene_keys.get(phash) else {
                        continue;
                    };
                    if !m.matches(&seq_to_string(gt, seq, 0)) {
                        continue;
                    }
                }
                out.extend(modes.values().copied());
            }
        }
        if view_objs {
            for (name, h) in &self.view_objs {
                if matcher.as_ref().map_or(true, |m| m.matches(name)) {
                    out.push(*h);
                }
            }
        }
        out
    }

    /// No drawn paths and no view objects of its own. Linked content is
    /// the registry's business.
    pub fn empty(&self) -> bool {
        self.scene_keys.is_empty() && self.view_objs.is_empty()
    }

    pub(crate) fn flag_empty(&mut self, empty: bool) {
        self.was_empty = empty;
    }

    // -- View objects ------------------------------------------------------

    /// Adopt a non-database scene object. Refused if the name is taken.
    pub fn add_obj(&mut self, name: &str, handle: SceneHandle) -> bool {
        if self.view_objs.contains_key(name) {
            return false;
        }
        self.view_objs.insert(name.to_string(), handle);
        true
    }

    pub fn remove_obj(&mut self, renderer: &mut dyn SceneRenderer, name: &str) -> bool {
        match self.view_objs.remove(name) {
            Some(h) => {
                renderer.release(h);
                true
            }
            None => false,
        }
    }

    /// Remove every view object whose name matches the glob pattern.
    /// Returns how many went.
    pub fn remove_objs(&mut self, renderer: &mut dyn SceneRenderer, pattern: &str) -> usize {
        let Ok(matcher) = glob::Pattern::new(pattern) else {
            return 0;
        };
        let doomed: Vec<String> = self
            .view_objs
            .keys()
            .filter(|n| matcher.matches(n))
            .cloned()
            .collect();
        for name in &doomed {
            if let Some(h) = self.view_objs.remove(name) {
                renderer.release(h);
            }
        }
        doomed.len()
    }

    pub fn view_obj(&self, name: &str) -> Option<SceneHandle> {
        self.view_objs.get(name).copied()
    }

    // -- Linking -----------------------------------------------------------

    /// Source drawn paths (or view objects) from `target` in addition to
    /// local content.
    pub fn link(&mut self, target: ViewId, view_objs: bool) -> bool {
        if target == self.id {
            return false;
        }
        if view_objs {
            self.link_objs = Some(target);
        } else {
            self.link_paths = Some(target);
        }
        true
    }

    /// Decouple. Never happens implicitly.
    pub fn unlink(&mut self, view_objs: bool) -> bool {
        if view_objs {
            self.link_objs.take().is_some()
        } else {
            self.link_paths.take().is_some()
        }
    }

    pub fn link_paths(&self) -> Option<&ViewId> {
        self.link_paths.as_ref()
    }

    pub fn link_objs(&self) -> Option<&ViewId> {
        self.link_objs.as_ref()
    }

    // -- Redraw / render ---------------------------------------------------

    /// Revalidate drawn paths, refresh those touched by `touched` objects,
    /// expand staged paths, and rebuild the collapsed sets. Does not touch
    /// pixels. Returns true if the drawn object set changed.
    pub fn redraw(
        &mut self,
        gt: &GroundTruth,
        renderer: &mut dyn SceneRenderer,
        touched: &HashSet<u64>,
        detail: u32,
        autoview: bool,
    ) -> bool {
        let mut changed = false;

        // 1. Invalid paths are gone, not re-pointed.
        let invalid: Vec<u64> = self
            .scene_keys
            .iter()
            .filter(|(_, seq)| !seq_valid(gt, seq))
            .map(|(phash, _)| *phash)
            .collect();
        for phash in invalid {
            debug!(view = %self.id, phash, "dropping invalidated path");
            if let Some(modes) = self.scene_objs.remove(&phash) {
                for h in modes.values() {
                    renderer.release(*h);
                }
            }
            self.scene_keys.remove(&phash);
            self.leaf_settings.remove(&phash);
            changed = true;
        }

        // 2. Surviving paths that use a touched object get their scene
        // objects refreshed with current color/matrix/bounds.
        if !touched.is_empty() {
            for (phash, seq) in &self.scene_keys {
                let uses_touched = (0..seq.len())
                    .any(|i| elem_obj(gt, seq, i).map_or(false, |o| touched.contains(&o)));
                if !uses_touched {
                    continue;
                }
                if let Some(modes) = self.scene_objs.get(phash) {
                    for (mode, handle) in modes {
                        let settings = self
                            .leaf_settings
                            .get(phash)
                            .and_then(|ls| ls.get(mode))
                            .cloned()
                            .unwrap_or_default();
                        let req =
                            build_request(gt, seq, None, *mode, &settings, detail, true);
                        renderer.refresh(*handle, &req);
                        changed = true;
                    }
                }
            }
        }

        // 3. Previously collapsed (fully drawn) paths re-expand so a comb
        // that gained children stays fully drawn. Evaluated modes are
        // exact-path and never expand.
        if !touched.is_empty() {
            let prior = std::mem::take(&mut self.mode_collapsed);
            for (mode, seqs) in &prior {
                if mode.is_evaluated() {
                    continue;
                }
                for seq in seqs {
                    if !seq_valid(gt, seq) {
                        continue;
                    }
                    let settings = self
                        .added_settings
                        .get(&(seq_hash(seq, 0), *mode))
                        .cloned()
                        .unwrap_or_default();
                    self.gather_paths(
                        gt,
                        renderer,
                        seq.clone(),
                        *mode,
                        &settings,
                        detail,
                        &mut changed,
                    );
                }
            }
        }

        // 4. Staged paths join the drawn set.
        let staged = std::mem::take(&mut self.staged);
        for (seq, mode, settings) in staged {
            if !seq_valid(gt, &seq) {
                continue;
            }
            self.added_settings
                .insert((seq_hash(&seq, 0), mode), settings.clone());
            if mode.is_evaluated() {
                self.scene_obj_at(gt, renderer, &seq, None, mode, &settings, detail, &mut changed);
            } else {
                self.gather_paths(gt, renderer, seq, mode, &settings, detail, &mut changed);
            }
        }

        // 5. First population of an empty view recenters it.
        if autoview && self.was_empty && !self.scene_keys.is_empty() {
            let mut bb = Aabb::EMPTY;
            for seq in self.scene_keys.values() {
                if let Some(leaf_bb) = seq_bbox(gt, seq) {
                    bb.merge(&leaf_bb);
                }
            }
            if bb.valid() {
                self.camera.center = bb.center();
                self.camera.scale = bb.diagonal().max(f64::MIN_POSITIVE);
                debug!(view = %self.id, "autoview to {:?}", self.camera.center);
            }
            self.was_empty = false;
        }

        // 6. Membership settled - rebuild the collapse-derived sets.
        self.cache_collapsed(gt);
        changed
    }

    /// Present the view: forward every local handle, then `extra` (the
    /// registry passes link-target handles there). Also snapshots the
    /// state hashes `dirty()` compares against.
    pub fn render(&mut self, renderer: &mut dyn SceneRenderer, extra: &[SceneHandle]) {
        for modes in self.scene_objs.values() {
            for h in modes.values() {
                renderer.draw(*h);
            }
        }
        for h in self.view_objs.values() {
            renderer.draw(*h);
        }
        for h in extra {
            renderer.draw(*h);
        }
        self.old_view_hash = self.camera.state_hash();
        self.old_objs_hash = self.objs_hash();
    }

    /// Has camera or object-set state changed since the last `render()`?
    pub fn dirty(&self) -> bool {
        self.camera.state_hash() != self.old_view_hash || self.objs_hash() != self.old_objs_hash
    }

    /// Release everything this view holds.
    pub fn clear(&mut self, renderer: &mut dyn SceneRenderer) {
        for modes in self.scene_objs.values() {
            for h in modes.values() {
                renderer.release(*h);
            }
        }
        for h in self.view_objs.values() {
            renderer.release(*h);
        }
        self.scene_objs.clear();
        self.scene_keys.clear();
        self.leaf_settings.clear();
        self.staged.clear();
        self.added_settings.clear();
        self.view_objs.clear();
        self.mode_collapsed.clear();
        self.all_collapsed.clear();
        self.drawn.clear();
        self.partially.clear();
        self.all_drawn.clear();
        self.all_partially.clear();
    }

    fn objs_hash(&self) -> u64 {
        let handles = self
            .scene_objs
            .values()
            .flat_map(|m| m.values().map(|h| h.0));
        let objs = self.view_objs.keys().map(|n| name_hash(n));
        set_hash(handles.chain(objs))
    }

    // -- Internals ---------------------------------------------------------

    /// Walk the tree below `seq`, materializing a scene object at every
    /// leaf that does not already have one for `mode`. Matrix state is
    /// threaded down the recursion; cyclic branches stop at the revisit.
    #[allow(clippy::too_many_arguments)]
    fn gather_paths(
        &mut self,
        gt: &GroundTruth,
        renderer: &mut dyn SceneRenderer,
        mut seq: Vec<u64>,
        mode: DrawMode,
        settings: &DrawSettings,
        detail: u32,
        changed: &mut bool,
    ) {
        let m0 = seq_matrix(gt, &seq);
        self.gather_walk(gt, renderer, &mut seq, m0, mode, settings, detail, changed);
    }

    #[allow(clippy::too_many_arguments)]
    fn gather_walk(
        &mut self,
        gt: &GroundTruth,
        renderer: &mut dyn SceneRenderer,
        seq: &mut Vec<u64>,
        m: DMat4,
        mode: DrawMode,
        settings: &DrawSettings,
        detail: u32,
        changed: &mut bool,
    ) {
        let leaf = *seq.last().expect("gather on empty path");
        match gt.element_children(leaf) {
            Some(children) if !children.is_empty() && !seq_addition_cyclic(gt, seq) => {
                for c in children.to_vec() {
                    let Some(inst) = gt.instance(c) else {
                        continue;
                    };
                    if inst.op == BoolOp::Subtract && settings.draw_non_subtract_only {
                        continue;
                    }
                    let lm = m * inst.local_matrix();
                    seq.push(c);
                    self.gather_walk(gt, renderer, seq, lm, mode, settings, detail, changed);
                    seq.pop();
                }
            }
            _ => {
                self.scene_obj_at(gt, renderer, seq, Some(m), mode, settings, detail, changed);
            }
        }
    }

    /// Materialize one path at one mode, unless it already has a handle.
    #[allow(clippy::too_many_arguments)]
    fn scene_obj_at(
        &mut self,
        gt: &GroundTruth,
        renderer: &mut dyn SceneRenderer,
        seq: &[u64],
        m: Option<DMat4>,
        mode: DrawMode,
        settings: &DrawSettings,
        detail: u32,
        changed: &mut bool,
    ) {
        let phash = seq_hash(seq, 0);
        if let Some(modes) = self.scene_objs.get(&phash) {
            if modes.contains_key(&mode) {
                return;
            }
        }
        let req = build_request(gt, seq, m, mode, settings, detail, false);
        let handle = renderer.materialize(&req);
        self.scene_objs.entry(phash).or_default().insert(mode, handle);
        self.scene_keys.insert(phash, seq.to_vec());
        self.leaf_settings
            .entry(phash)
            .or_default()
            .insert(mode, settings.clone());
        *changed = true;
    }

    /// Rebuild the per-mode and aggregate collapsed lists plus the
    /// fully/partially drawn hash sets from the materialized leaves.
    fn cache_collapsed(&mut self, gt: &GroundTruth) {
        let mut mode_map: HashMap<DrawMode, Vec<Vec<u64>>> = HashMap::new();
        for (phash, modes) in &self.scene_objs {
            let Some(seq) = self.scene_keys.get(phash) else {
                continue;
            };
            for mode in modes.keys() {
                mode_map.entry(*mode).or_default().push(seq.clone());
            }
        }

        self.mode_collapsed.clear();
        self.drawn.clear();
        self.partially.clear();

        for (mode, seqs) in &mode_map {
            if mode.is_evaluated() {
                // Exact-path membership: no collapse pass, no partials.
                let hashes: HashSet<u64> = seqs.iter().map(|s| seq_hash(s, 0)).collect();
                self.mode_collapsed.insert(*mode, seqs.clone());
                self.drawn.insert(*mode, hashes);
                self.partially.insert(*mode, HashSet::new());
            } else {
                let (collapsed, fully, part) = collapse_seqs(gt, seqs);
                self.mode_collapsed.insert(*mode, collapsed);
                self.drawn.insert(*mode, fully);
                self.partially.insert(*mode, part);
            }
        }

        let all_seqs: Vec<Vec<u64>> = self.scene_keys.values().cloned().collect();
        let (collapsed, fully, part) = collapse_seqs(gt, &all_seqs);
        self.all_collapsed = collapsed;
        self.all_drawn = fully;
        self.all_partially = part;
    }
}

/// Finalize the renderable description of one path: accumulated matrix,
/// resolved color, dash style, bounds.
fn build_request(
    gt: &GroundTruth,
    seq: &[u64],
    m: Option<DMat4>,
    mode: DrawMode,
    settings: &DrawSettings,
    detail: u32,
    stale: bool,
) -> SceneObjRequest {
    let matrix = m.unwrap_or_else(|| seq_matrix(gt, seq));
    let color = settings
        .color_override
        .or_else(|| seq_color(gt, seq))
        .unwrap_or([255, 0, 0]);
    // Dashed lines only matter for un-evaluated wireframes.
    let dashed = mode == DrawMode::Wireframe
        && !settings.draw_solid_lines_only
        && (seq_has_op(gt, seq, BoolOp::Subtract) || seq_has_op(gt, seq, BoolOp::Intersect));
    SceneObjRequest {
        name: seq_to_string(gt, seq, 0),
        path_hash: seq_hash(seq, 0),
        mode,
        matrix,
        color,
        line_width: settings.line_width,
        transparency: settings.transparency,
        dashed,
        bounds: seq_bbox(gt, seq),
        detail_level: detail,
        stale,
    }
}
