//! Error types for the scene state layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SceneDbError>;

/// Errors reserved for genuine failures (I/O, corrupt cache data).
///
/// Routine lookup misses are NOT errors - a stale hash is an expected
/// outcome after database mutation, and the affected operations return
/// `Option`/`bool` instead.
#[derive(Error, Debug)]
pub enum SceneDbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache format error: {0}")]
    CacheFormat(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
