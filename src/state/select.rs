//! Selection state.
//!
//! A selection is a set of explicitly chosen paths, kept non-overlapping:
//! selecting both a path and one of its ancestors or descendants is
//! rejected outright, because editing code must never see two levels of
//! one branch as simultaneous targets. The derived sets (active subtree
//! paths, parent prefixes, immediate/ancestor comb objects) exist so
//! highlighting can test membership per frame without walking the tree.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::hash::{seq_hash, set_hash};
use crate::state::collect_below;
use crate::state::object::GroundTruth;
use crate::state::path::{elem_obj, seq_to_string};
use crate::state::{collapse_seqs, expand_seq, natural_cmp};

/// Non-overlapping selected paths plus highlight-support sets.
#[derive(Debug, Default)]
pub struct Selection {
    /// Explicitly selected paths, hash -> elements. Never an expanded or
    /// collapsed form - editing needs the precise paths the user named.
    selected: HashMap<u64, Vec<u64>>,

    /// Hashes of every path at or below a selection (the selections
    /// themselves included).
    active: HashSet<u64>,
    /// Hashes of every proper prefix path above a selection.
    active_parents: HashSet<u64>,
    /// Objects whose combs directly instance a selected leaf object.
    immediate_parents: HashSet<u64>,
    /// Objects above the immediate parents, transitively.
    ancestors: HashSet<u64>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a path. Fails when the path does not validate against the
    /// mirrored hierarchy, or when it overlaps an existing selection
    /// (ancestor or descendant of one) - overlap is rejected, not merged.
    pub fn select(&mut self, gt: &GroundTruth, seq: &[u64]) -> bool {
        if seq.is_empty() {
            return false;
        }
        let shash = seq_hash(seq, 0);
        if self.selected.contains_key(&shash) {
            return true;
        }
        if !chain_valid(gt, seq) {
            return false;
        }
        for cur in self.selected.values() {
            let overlap = if cur.len() <= seq.len() {
                seq[..cur.len()] == cur[..]
            } else {
                cur[..seq.len()] == seq[..]
            };
            if overlap {
                debug!("selection overlaps an existing selection, rejected");
                return false;
            }
        }

        self.selected.insert(shash, seq.to_vec());
        self.characterize(gt);
        true
    }

    /// Remove a path from the selection. False if it was not selected.
    pub fn deselect(&mut self, gt: &GroundTruth, seq: &[u64]) -> bool {
        let shash = seq_hash(seq, 0);
        if self.selected.remove(&shash).is_none() {
            return false;
        }
        self.characterize(gt);
        true
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.active.clear();
        self.active_parents.clear();
        self.immediate_parents.clear();
        self.ancestors.clear();
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_selected(&self, phash: u64) -> bool {
        self.selected.contains_key(&phash)
    }

    /// Path is a selection or inside a selected subtree.
    pub fn is_active(&self, phash: u64) -> bool {
        self.active.contains(&phash)
    }

    /// Path is a proper prefix of a selection.
    pub fn is_active_parent(&self, phash: u64) -> bool {
        self.active_parents.contains(&phash)
    }

    /// Object's comb directly instances a selected leaf object.
    pub fn is_immediate_parent(&self, ohash: u64) -> bool {
        self.immediate_parents.contains(&ohash)
    }

    /// Object sits above an immediate parent, at any remove.
    pub fn is_ancestor(&self, ohash: u64) -> bool {
        self.ancestors.contains(&ohash)
    }

    /// Either of the above.
    pub fn is_parent_obj(&self, ohash: u64) -> bool {
        self.is_immediate_parent(ohash) || self.is_ancestor(ohash)
    }

    /// Sorted display strings of the EXPLICITLY selected paths, optionally
    /// glob-filtered. Deliberately never matches into descendants - the
    /// editing target set must stay unambiguous to callers.
    pub fn find_selected(&self, gt: &GroundTruth, pattern: Option<&str>) -> Vec<String> {
        let matcher = pattern.and_then(|p| glob::Pattern::new(p).ok());
        if pattern.is_some() && matcher.is_none() {
            return Vec::new();
        }
        let mut out: Vec<String> = self
            .selected
            .values()
            .map(|seq| seq_to_string(gt, seq, 0))
            .filter(|s| matcher.as_ref().map_or(true, |m| m.matches(s)))
            .collect();
        out.sort_by(|a, b| natural_cmp(a, b));
        out
    }

    pub fn selected_hashes(&self) -> Vec<u64> {
        self.selected.keys().copied().collect()
    }

    /// Replace every selection with its expansion to leaf paths.
    pub fn expand(&mut self, gt: &GroundTruth) {
        let mut out: Vec<Vec<u64>> = Vec::new();
        for seq in self.selected.values() {
            let mut walk = seq.clone();
            expand_seq(gt, &mut walk, &mut out);
        }
        self.selected = out
            .into_iter()
            .map(|seq| (seq_hash(&seq, 0), seq))
            .collect();
        self.characterize(gt);
    }

    /// Replace the selections with their shallowest exact summary.
    pub fn collapse(&mut self, gt: &GroundTruth) {
        let seqs: Vec<Vec<u64>> = self.selected.values().cloned().collect();
        let (collapsed, _, _) = collapse_seqs(gt, &seqs);
        self.selected = collapsed
            .into_iter()
            .map(|seq| (seq_hash(&seq, 0), seq))
            .collect();
        self.characterize(gt);
    }

    /// Recompute every derived set from the selected paths. Cost is
    /// O(selected set size x average depth) for the path sets plus one
    /// instance-map scan per selected leaf for the object sets.
    pub fn characterize(&mut self, gt: &GroundTruth) {
        self.active.clear();
        self.active_parents.clear();
        self.immediate_parents.clear();
        self.ancestors.clear();

        for seq in self.selected.values() {
            let mut walk = seq.clone();
            collect_below(gt, &mut walk, &mut self.active);
            for l in 1..seq.len() {
                self.active_parents.insert(seq_hash(seq, l));
            }
        }

        // Combs instancing a selected leaf object anywhere in the
        // database, then everything above those, breadth-first.
        let mut leaf_objs: HashSet<u64> = HashSet::new();
        for seq in self.selected.values() {
            if seq.len() < 2 {
                continue;
            }
            if let Some(obj) = elem_obj(gt, seq, seq.len() - 1) {
                leaf_objs.insert(obj);
            }
        }
        for inst in gt.instances.values() {
            if leaf_objs.contains(&inst.child_hash) {
                self.immediate_parents.insert(inst.parent_hash);
            }
        }

        let mut queue: VecDeque<u64> = self.immediate_parents.iter().copied().collect();
        while let Some(obj) = queue.pop_front() {
            for inst in gt.instances.values() {
                if inst.child_hash == obj && self.ancestors.insert(inst.parent_hash) {
                    queue.push_back(inst.parent_hash);
                }
            }
        }
    }

    /// Drop selections the database no longer supports. Unlike drawing
    /// there is nothing to preserve - an invalid selection is gone.
    pub fn refresh(&mut self, gt: &GroundTruth) {
        let before = self.selected.len();
        self.selected.retain(|_, seq| chain_valid(gt, seq));
        if self.selected.len() != before {
            debug!(
                dropped = before - self.selected.len(),
                "selection refresh dropped invalidated paths"
            );
        }
        self.characterize(gt);
    }

    /// Hash of the selected set, for cheap change detection.
    pub fn state_hash(&self) -> u64 {
        set_hash(self.selected.keys().copied())
    }
}

/// Root resolves and every step is a current parent/child edge.
fn chain_valid(gt: &GroundTruth, seq: &[u64]) -> bool {
    if seq.is_empty() || gt.object(seq[0]).is_none() {
        return false;
    }
    for i in 1..seq.len() {
        match gt.element_children(seq[i - 1]) {
            Some(children) if children.contains(&seq[i]) => {}
            _ => return false,
        }
    }
    true
}
