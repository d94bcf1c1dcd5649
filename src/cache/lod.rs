//! Level-of-detail side cache and background warming.
//!
//! LOD records are resolution-scaled stand-ins for leaf geometry, cached
//! independently of the path/view system and keyed by object name hash.
//! When a database is opened, a detached best-effort warming pass
//! precomputes records for every solid so the first adaptive draw does not
//! stall.
//!
//! Sharing rules: the cache is the ONLY structure the warming thread
//! touches, entries are independent (keyed by stable object identity), and
//! writes are last-write-wins. The foreground never waits on the pass - if
//! it needs a record first it computes one synchronously and whichever
//! write lands last simply stays.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use glam::DVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::geom::Aabb;

/// One precomputed LOD record: bounds plus a coarse point scaffold on the
/// bounding lattice, scaled by `level` (higher = denser).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LodRecord {
    pub level: u32,
    pub bounds: Aabb,
    pub points: Vec<DVec3>,
}

/// Input for one warming computation: identity, display name, local bounds.
#[derive(Debug, Clone)]
pub struct LodSeed {
    pub hash: u64,
    pub name: String,
    pub bounds: Aabb,
}

/// Compute the LOD scaffold for one object synchronously.
pub fn compute_lod(seed: &LodSeed, level: u32) -> LodRecord {
    let bb = seed.bounds;
    let mut points = Vec::new();
    if bb.valid() {
        // Lattice resolution grows with the requested level.
        let n = (level as usize) + 2;
        let step = (bb.max - bb.min) / (n as f64 - 1.0);
        for ix in 0..n {
            for iy in 0..n {
                for iz in 0..n {
                    // Surface points only - interior samples add nothing
                    // for a scaffold.
                    let edge = ix == 0 || ix == n - 1 || iy == 0 || iy == n - 1
                        || iz == 0 || iz == n - 1;
                    if !edge {
                        continue;
                    }
                    points.push(DVec3::new(
                        bb.min.x + step.x * ix as f64,
                        bb.min.y + step.y * iy as f64,
                        bb.min.z + step.z * iz as f64,
                    ));
                }
            }
        }
    }
    trace!(name = %seed.name, level, points = points.len(), "computed lod record");
    LodRecord {
        level,
        bounds: bb,
        points,
    }
}

/// Thread-safe, last-write-wins LOD record store.
///
/// Clones share the same underlying map, so a clone can be handed to the
/// warming thread while the foreground keeps its own.
#[derive(Debug, Clone, Default)]
pub struct LodCache {
    inner: Arc<Mutex<HashMap<u64, LodRecord>>>,
}

impl LodCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: u64) -> Option<LodRecord> {
        self.inner.lock().unwrap().get(&hash).cloned()
    }

    /// Insert unconditionally. Later writes replace earlier ones no matter
    /// which thread they come from.
    pub fn put(&self, hash: u64, record: LodRecord) {
        self.inner.lock().unwrap().insert(hash, record);
    }

    pub fn forget(&self, hash: u64) {
        self.inner.lock().unwrap().remove(&hash);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Fetch a record at (at least) `level`, computing synchronously on
    /// miss. A background-computed record at a lower level is upgraded.
    pub fn get_or_compute(&self, seed: &LodSeed, level: u32) -> LodRecord {
        if let Some(rec) = self.get(seed.hash) {
            if rec.level >= level {
                return rec;
            }
        }
        let rec = compute_lod(seed, level);
        self.put(seed.hash, rec.clone());
        rec
    }

    /// Kick off the detached warming pass over `seeds`.
    ///
    /// Records are computed in parallel and funneled through a channel into
    /// the cache. There is no cancellation and completion is not awaited;
    /// the returned `JoinHandle` exists only so tests can join.
    pub fn warm_background(&self, seeds: Vec<LodSeed>, level: u32) -> thread::JoinHandle<()> {
        let cache = self.clone();
        thread::spawn(move || {
            let total = seeds.len();
            let (tx, rx) = crossbeam_channel::bounded::<(u64, LodRecord)>(64);

            let producer = thread::spawn(move || {
                seeds.par_iter().for_each_with(tx, |tx, seed| {
                    let rec = compute_lod(seed, level);
                    // Receiver gone means the process is tearing down;
                    // nothing useful to do with the record.
                    let _ = tx.send((seed.hash, rec));
                });
            });

            for (hash, rec) in rx {
                cache.put(hash, rec);
            }
            let _ = producer.join();
            debug!(total, level, "lod warming pass finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(name: &str) -> LodSeed {
        LodSeed {
            hash: crate::hash::name_hash(name),
            name: name.to_string(),
            bounds: Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0)),
        }
    }

    #[test]
    fn test_compute_lod_levels_scale() {
        let s = seed("ball.s");
        let coarse = compute_lod(&s, 0);
        let fine = compute_lod(&s, 3);
        assert!(fine.points.len() > coarse.points.len());
        // Level 0 is the 8 corners
        assert_eq!(coarse.points.len(), 8);
        assert_eq!(coarse.bounds, s.bounds);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = LodCache::new();
        let s = seed("ball.s");
        cache.put(s.hash, compute_lod(&s, 0));
        cache.put(s.hash, compute_lod(&s, 2));
        assert_eq!(cache.get(s.hash).unwrap().level, 2);
        // An "older" write still replaces - last write wins, no ordering.
        cache.put(s.hash, compute_lod(&s, 1));
        assert_eq!(cache.get(s.hash).unwrap().level, 1);
    }

    #[test]
    fn test_get_or_compute_upgrades_level() {
        let cache = LodCache::new();
        let s = seed("ball.s");
        cache.put(s.hash, compute_lod(&s, 0));
        let rec = cache.get_or_compute(&s, 2);
        assert_eq!(rec.level, 2);
        assert_eq!(cache.get(s.hash).unwrap().level, 2);
        // Present at a sufficient level: no recompute, record returned as-is
        let rec2 = cache.get_or_compute(&s, 1);
        assert_eq!(rec2.level, 2);
    }

    #[test]
    fn test_warm_background_populates() {
        let cache = LodCache::new();
        let seeds: Vec<LodSeed> = (0..16).map(|i| seed(&format!("s{}", i))).collect();
        let handle = cache.warm_background(seeds.clone(), 1);
        handle.join().unwrap();
        assert_eq!(cache.len(), 16);
        for s in &seeds {
            assert_eq!(cache.get(s.hash).unwrap().level, 1);
        }
    }

    #[test]
    fn test_foreground_does_not_wait() {
        // The foreground computes synchronously whether or not a warming
        // pass is in flight; the cache just takes the last write.
        let cache = LodCache::new();
        let s = seed("ball.s");
        let handle = cache.warm_background(vec![s.clone()], 0);
        let rec = cache.get_or_compute(&s, 4);
        assert_eq!(rec.level, 4);
        handle.join().unwrap();
        // Whichever write landed last is fine - both are usable records.
        assert!(cache.get(s.hash).is_some());
    }
}
