//! Disk-backed side cache for per-object drawing data.
//!
//! Cracking an object's attribute block (and, for solids, bounding its
//! geometry) is the slow part of populating the scene state on open. The
//! values are stable for a given object, so they are cached on disk keyed
//! by name hash and reloaded on the next open.
//!
//! Format: one bincode-serialized `CacheFile` per database. A corrupt or
//! truncated cache file is discarded and rebuilt - never a fatal error.

pub mod lod;

pub use lod::{LodCache, LodRecord, LodSeed};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::ObjectAttrs;
use crate::error::Result;
use crate::geom::Aabb;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    attrs: HashMap<u64, ObjectAttrs>,
    bounds: HashMap<u64, Aabb>,
}

/// Attribute/bounds cache, optionally persisted to one file.
#[derive(Debug, Default)]
pub struct DiskCache {
    path: Option<PathBuf>,
    data: CacheFile,
    dirty: bool,
}

impl DiskCache {
    /// Cache with no backing file. Entries live for the process only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or start) a cache backed by `path`. Unreadable or corrupt
    /// contents are discarded with a warning.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read(&path) {
            Ok(bytes) => match bincode::deserialize::<CacheFile>(&bytes) {
                Ok(data) => {
                    debug!(
                        entries = data.attrs.len(),
                        "loaded attribute cache from {}",
                        path.display()
                    );
                    data
                }
                Err(e) => {
                    warn!("discarding corrupt cache file {}: {}", path.display(), e);
                    CacheFile::default()
                }
            },
            Err(_) => CacheFile::default(),
        };
        Self {
            path: Some(path),
            data,
            dirty: false,
        }
    }

    pub fn attrs(&self, hash: u64) -> Option<ObjectAttrs> {
        self.data.attrs.get(&hash).copied()
    }

    pub fn put_attrs(&mut self, hash: u64, attrs: ObjectAttrs) {
        self.data.attrs.insert(hash, attrs);
        self.dirty = true;
    }

    pub fn bounds(&self, hash: u64) -> Option<Aabb> {
        self.data.bounds.get(&hash).copied()
    }

    pub fn put_bounds(&mut self, hash: u64, bounds: Aabb) {
        self.data.bounds.insert(hash, bounds);
        self.dirty = true;
    }

    /// Drop all cached values for one object (changed or removed).
    pub fn forget(&mut self, hash: u64) {
        let had = self.data.attrs.remove(&hash).is_some()
            | self.data.bounds.remove(&hash).is_some();
        if had {
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.data.attrs.len().max(self.data.bounds.len())
    }

    pub fn is_empty(&self) -> bool {
        self.data.attrs.is_empty() && self.data.bounds.is_empty()
    }

    /// Write the cache back to its file, if it has one and has changed.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let bytes = bincode::serialize(&self.data)?;
        fs::write(path, bytes)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn test_in_memory_round_trip() {
        let mut cache = DiskCache::in_memory();
        let attrs = ObjectAttrs {
            color: Some([0, 255, 0]),
            color_inherit: true,
            region_id: Some(1001),
            region_flag: true,
        };
        cache.put_attrs(7, attrs);
        assert_eq!(cache.attrs(7), Some(attrs));
        assert_eq!(cache.attrs(8), None);

        cache.forget(7);
        assert_eq!(cache.attrs(7), None);
    }

    #[test]
    fn test_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("attrs.cache");

        let mut cache = DiskCache::open(&file);
        cache.put_attrs(
            1,
            ObjectAttrs {
                color: Some([10, 20, 30]),
                ..Default::default()
            },
        );
        cache.put_bounds(1, Aabb::new(DVec3::ZERO, DVec3::ONE));
        cache.flush().unwrap();

        let reopened = DiskCache::open(&file);
        assert_eq!(reopened.attrs(1).unwrap().color, Some([10, 20, 30]));
        assert_eq!(reopened.bounds(1).unwrap().max, DVec3::ONE);
    }

    #[test]
    fn test_corrupt_cache_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("attrs.cache");
        fs::write(&file, b"not a cache file").unwrap();

        let cache = DiskCache::open(&file);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_flush_without_file_is_noop() {
        let mut cache = DiskCache::in_memory();
        cache.put_attrs(1, ObjectAttrs::default());
        cache.flush().unwrap();
    }
}
