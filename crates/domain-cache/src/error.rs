//! Cache error types.

use grid_common::GridError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache catalog error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache file error at '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache record '{key}': {reason}")]
    CorruptRecord { key: String, reason: String },
}

impl CacheError {
    pub fn file(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

impl From<CacheError> for GridError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Database(e) => GridError::access("cache catalog", e),
            CacheError::File { path, source } => GridError::access(path, source),
            CacheError::CorruptRecord { key, reason } => {
                GridError::access(format!("cache record {}", key), reason)
            }
        }
    }
}
