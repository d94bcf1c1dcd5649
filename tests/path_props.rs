//! Property tests for the path/draw-state algebra.

use std::collections::HashSet;

use proptest::prelude::*;

use scenedb::hash::seq_hash;
use scenedb::{
    BoolOp, DrawMode, DrawSettings, MemoryDb, ObjPath, RecordingRenderer, SceneDb, TreeEntry,
    ViewId,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scene(db: MemoryDb) -> SceneDb {
    SceneDb::open(Box::new(db), Box::new(RecordingRenderer::new()))
}

/// Two-level tree: `top` unions combs `g0..gN`, each unioning a disjoint
/// set of solids. No leaf is shared between combs, which is the
/// precondition for exact collapse/expand round trips.
fn grid_db(groups: usize, leaves_per_group: usize) -> MemoryDb {
    let mut db = MemoryDb::new();
    let mut group_names = Vec::new();
    for g in 0..groups {
        let mut children = Vec::new();
        for l in 0..leaves_per_group {
            let name = format!("g{}_l{}", g, l);
            db.add_solid(&name);
            children.push(name);
        }
        let gname = format!("g{}", g);
        let refs: Vec<&str> = children.iter().map(|s| s.as_str()).collect();
        db.add_union_comb(&gname, &refs);
        group_names.push(gname);
    }
    let refs: Vec<&str> = group_names.iter().map(|s| s.as_str()).collect();
    db.add_union_comb("top", &refs);
    db
}

// ---------------------------------------------------------------------------
// Hash stability
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn hash_depends_only_on_sequence(seq in prop::collection::vec(any::<u64>(), 1..32),
                                     max_len in 0usize..40) {
        let h1 = seq_hash(&seq, max_len);
        let h2 = seq_hash(&seq, max_len);
        prop_assert_eq!(h1, h2);

        // Truncated hash equals the hash of the truncated sequence.
        let mlen = if max_len == 0 || max_len > seq.len() { seq.len() } else { max_len };
        prop_assert_eq!(h1, seq_hash(&seq[..mlen], 0));
    }

    #[test]
    fn hash_distinguishes_prefix_lengths(seq in prop::collection::vec(any::<u64>(), 2..16)) {
        // Equal up to a shorter max_len, different at full length (barring
        // astronomically unlikely collisions).
        prop_assert_eq!(seq_hash(&seq, seq.len() - 1), seq_hash(&seq[..seq.len() - 1], 0));
        prop_assert_ne!(seq_hash(&seq, seq.len() - 1), seq_hash(&seq, 0));
    }
}

// ---------------------------------------------------------------------------
// Push/pop inverse
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn push_pop_restores_path(group in 0usize..4, leaf in 0usize..4) {
        let s = scene(grid_db(4, 4));
        let gt = s.ground();

        let mut p = ObjPath::from_string(gt, &format!("top/g{}", group)).unwrap();
        let before_hash = p.hash();
        let before_elems = p.elements().to_vec();

        let leaf_key = scenedb::hash::pair_hash(
            scenedb::hash::name_hash(&format!("g{}", group)),
            scenedb::hash::name_hash(&format!("g{}_l{}", group, leaf)),
        );
        prop_assert!(p.push(gt, leaf_key).is_some());
        prop_assert_ne!(p.hash(), before_hash);

        p.pop(gt, true);
        prop_assert_eq!(p.hash(), before_hash);
        prop_assert_eq!(p.elements(), &before_elems[..]);
    }
}

// ---------------------------------------------------------------------------
// Expand / collapse round trip
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn collapse_expand_reproduces_leaf_set(mask in 1u32..(1 << 12)) {
        // Any nonempty subset of the 12 leaves of a 4x3 grid.
        let mut s = scene(grid_db(4, 3));

        let mut leaf_hashes = Vec::new();
        for g in 0..4 {
            for l in 0..3 {
                let bit = g * 3 + l;
                if mask & (1 << bit) != 0 {
                    let path = format!("top/g{}/g{}_l{}", g, g, l);
                    leaf_hashes.push(s.get_path(&path).unwrap());
                }
            }
        }

        let collapsed = s.collapse_paths(&leaf_hashes, true);
        let expanded = s.expand_paths(&collapsed, true);

        let want: HashSet<u64> = leaf_hashes.iter().copied().collect();
        let got: HashSet<u64> = expanded.iter().copied().collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn collapse_never_oversummarizes(mask in 1u32..(1 << 6)) {
        // With one group of 6 leaves, any strict subset must NOT collapse
        // to the group (that would draw unrequested siblings).
        let mut s = scene(grid_db(1, 6));

        let mut leaf_hashes = Vec::new();
        for l in 0..6 {
            if mask & (1 << l) != 0 {
                leaf_hashes.push(s.get_path(&format!("top/g0/g0_l{}", l)).unwrap());
            }
        }
        let full = leaf_hashes.len() == 6;

        let collapsed = s.collapse_paths(&leaf_hashes, true);
        if full {
            prop_assert_eq!(collapsed.len(), 1);
            prop_assert_eq!(s.path_string(collapsed[0]).unwrap(), "top");
        } else {
            prop_assert_eq!(collapsed.len(), leaf_hashes.len());
        }
    }
}

// ---------------------------------------------------------------------------
// Boolean operator semantics: ANY operator along the path counts
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn subtraction_anywhere_on_path_counts(sub_level in 0usize..3, query_sub in any::<bool>()) {
        // chain: c0 -> c1 -> c2 -> leaf.s with exactly one non-union edge.
        let mut db = MemoryDb::new();
        db.add_solid("leaf.s");
        let op = if query_sub { BoolOp::Subtract } else { BoolOp::Intersect };

        let mut child = "leaf.s".to_string();
        for level in (0..3).rev() {
            let name = format!("c{}", level);
            let e = if level == sub_level {
                TreeEntry::new(&child).op(op)
            } else {
                TreeEntry::new(&child)
            };
            db.add_comb(&name, vec![e]);
            child = name;
        }
        let s = scene(db);
        let gt = s.ground();

        let p = ObjPath::from_string(gt, "c0/c1/c2/leaf.s").unwrap();
        // The operator is never at the leaf-most edge necessarily; any
        // position along the walk must be reported.
        prop_assert_eq!(p.is_subtraction(gt), query_sub);
        prop_assert_eq!(p.is_intersection(gt), !query_sub);
    }
}

// ---------------------------------------------------------------------------
// Selection non-overlap invariant
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn selection_never_overlaps(ops in prop::collection::vec((0usize..3, 0usize..3, any::<bool>()), 1..24)) {
        let mut s = scene(grid_db(3, 3));

        // Candidate paths at all three depths.
        let mut candidates = vec!["top".to_string()];
        for g in 0..3 {
            candidates.push(format!("top/g{}", g));
            for l in 0..3 {
                candidates.push(format!("top/g{}/g{}_l{}", g, g, l));
            }
        }

        for (a, b, select) in ops {
            let idx = (a * 3 + b) % candidates.len();
            let path = candidates[idx].clone();
            if select {
                s.select(&path);
            } else {
                s.deselect(&path);
            }
        }

        // Invariant: no selected path is a prefix of another.
        let strs = s.selection().find_selected(s.ground(), None);
        for x in &strs {
            for y in &strs {
                if x != y {
                    let xs = format!("{}/", x);
                    prop_assert!(!y.starts_with(&xs), "{} overlaps {}", x, y);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sync idempotence
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn second_sync_is_noop(remove_mask in 0u32..(1 << 4)) {
        let mut s = scene(grid_db(4, 2));
        for g in 0..4 {
            let path = format!("top/g{}", g);
            s.add_path(&ViewId::Default, &path, DrawMode::Wireframe, DrawSettings::default());
        }
        s.redraw(None, true);

        for g in 0..4 {
            if remove_mask & (1 << g) != 0 {
                let name = format!("g{}", g);
                s.db_mut()
                    .as_any_mut()
                    .downcast_mut::<MemoryDb>()
                    .unwrap()
                    .remove(&name);
                s.note_removed(&name);
            }
        }

        let first = s.sync(false);
        prop_assert_eq!(first, remove_mask != 0);
        prop_assert!(!s.sync(false), "second sync with no new notifications must be a no-op");
    }
}
