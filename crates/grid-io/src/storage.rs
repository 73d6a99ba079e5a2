//! Object storage backends (S3, HTTP) for Zarr access.
//!
//! The zarrs API is synchronous while object_store is async; remote stores
//! are wrapped in an async-to-sync adapter driven by the current tokio
//! runtime.

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{
    AsyncToSyncBlockOn, AsyncToSyncStorageAdapter,
};

use crate::error::{GridIoError, Result};

/// Blocking executor that works from within a tokio runtime.
///
/// Must be used from a multi-threaded runtime: `block_in_place` moves the
/// current task off the async worker before the runtime handle drives the
/// future.
#[derive(Clone, Copy)]
pub struct TokioBlockOn;

impl AsyncToSyncBlockOn for TokioBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
    }
}

/// Synchronous view of an async object store.
pub type RemoteStorage<T> = AsyncToSyncStorageAdapter<AsyncObjectStore<T>, TokioBlockOn>;

/// S3 connection settings. Credentials come from the environment only.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Custom endpoint (e.g. "http://minio:9000"); AWS when unset.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    /// Allow plain HTTP endpoints.
    pub allow_http: bool,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            region: "us-east-1".to_string(),
            allow_http: false,
        }
    }
}

impl ObjectStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            access_key_id: std::env::var("S3_ACCESS_KEY").ok(),
            secret_access_key: std::env::var("S3_SECRET_KEY").ok(),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            allow_http: std::env::var("S3_ALLOW_HTTP")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Storage for one S3 bucket.
pub fn create_s3_storage(
    config: &ObjectStoreConfig,
    bucket: &str,
) -> Result<Arc<RemoteStorage<object_store::aws::AmazonS3>>> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(&config.region)
        .with_allow_http(config.allow_http);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(key) = &config.access_key_id {
        builder = builder.with_access_key_id(key);
    }
    if let Some(secret) = &config.secret_access_key {
        builder = builder.with_secret_access_key(secret);
    }

    let s3 = builder.build().map_err(|e| {
        GridIoError::open_failed(format!("s3://{}", bucket), format!("S3 client: {}", e))
    })?;

    let async_store = Arc::new(AsyncObjectStore::new(s3));
    Ok(Arc::new(AsyncToSyncStorageAdapter::new(async_store, TokioBlockOn)))
}

/// Read-only storage rooted at an HTTP(S) URL.
pub fn create_http_storage(url: &str) -> Result<Arc<RemoteStorage<object_store::http::HttpStore>>> {
    let http = HttpBuilder::new()
        .with_url(url)
        .build()
        .map_err(|e| GridIoError::open_failed(url, format!("HTTP client: {}", e)))?;

    let async_store = Arc::new(AsyncObjectStore::new(http));
    Ok(Arc::new(AsyncToSyncStorageAdapter::new(async_store, TokioBlockOn)))
}
