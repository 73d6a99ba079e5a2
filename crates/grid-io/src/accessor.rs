//! URI-based dataset opening.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use zarrs_filesystem::FilesystemStore;

use crate::error::{GridIoError, Result};
use crate::source::{SourceAccessor, SourceHandle, ZarrSource};
use crate::storage::{create_http_storage, create_s3_storage, ObjectStoreConfig};

/// Where a dataset URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLocation {
    Local(PathBuf),
    S3 { bucket: String, path: String },
    Http(String),
}

impl DatasetLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(GridIoError::Config(format!("missing bucket in '{}'", uri)));
            }
            let key = key.trim_end_matches('/');
            let path = if key.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", key)
            };
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                path,
            });
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Self::Http(uri.to_string()));
        }
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        if uri.contains("://") {
            return Err(GridIoError::Config(format!("unsupported URI scheme in '{}'", uri)));
        }
        Ok(Self::Local(PathBuf::from(uri)))
    }
}

/// Opens Zarr datasets from local paths, S3 buckets and HTTP servers.
#[derive(Debug, Clone, Default)]
pub struct ZarrSourceAccessor {
    object_store: ObjectStoreConfig,
}

impl ZarrSourceAccessor {
    pub fn new(object_store: ObjectStoreConfig) -> Self {
        Self { object_store }
    }

    pub fn from_env() -> Self {
        Self::new(ObjectStoreConfig::from_env())
    }

    /// Open synchronously. Remote stores must be opened from a tokio runtime.
    pub fn open_blocking(&self, uri: &str) -> Result<Box<dyn SourceHandle>> {
        match DatasetLocation::parse(uri)? {
            DatasetLocation::Local(path) => {
                if !path.is_dir() {
                    return Err(GridIoError::open_failed(uri, "no such dataset"));
                }
                let store =
                    FilesystemStore::new(&path).map_err(|e| GridIoError::open_failed(uri, e))?;
                Ok(Box::new(ZarrSource::open(Arc::new(store), "/", uri)?))
            }
            DatasetLocation::S3 { bucket, path } => {
                let storage = create_s3_storage(&self.object_store, &bucket)?;
                Ok(Box::new(ZarrSource::open(storage, &path, uri)?))
            }
            DatasetLocation::Http(url) => {
                let storage = create_http_storage(&url)?;
                Ok(Box::new(ZarrSource::open(storage, "/", uri)?))
            }
        }
    }
}

#[async_trait]
impl SourceAccessor for ZarrSourceAccessor {
    async fn open(&self, uri: &str) -> Result<Box<dyn SourceHandle>> {
        self.open_blocking(uri)
    }
}
