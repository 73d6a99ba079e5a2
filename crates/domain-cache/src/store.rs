//! Cache store: lookup, capacity reservation and entry lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use grid_common::{AxisKind, GridError, GridResult};
use grid_io::writer::dataset_size;
use grid_io::{GridIoError, SourceHandle, ZarrGridWriter, ZarrSource, ZarrWriteOptions};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};
use zarrs_filesystem::FilesystemStore;

use crate::catalog::CacheCatalog;
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheRequest};
use crate::key::{CacheKey, CacheKeyDeriver};
use crate::overlap::OverlapClassifier;

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Exact match; the entry's file holds exactly the requested extract.
    Hit(CacheEntry),
    /// A larger materialized entry contains the request.
    Contained(CacheEntry),
    /// Nothing usable; the returned entry is pending and ready to be written.
    Miss(CacheEntry),
}

impl CacheLookup {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            Self::Hit(e) | Self::Contained(e) | Self::Miss(e) => e,
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, Self::Miss(_))
    }
}

/// What a reservation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReserveOutcome {
    pub required: u64,
    pub freed: u64,
    pub evicted: usize,
    /// Whether `used + required` now fits under the bound.
    pub satisfied: bool,
}

/// Cache-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub pending: u64,
    pub materialized: u64,
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl CacheStats {
    pub fn usage_ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.max_bytes as f64
        }
    }
}

/// Owner of cache entries and their backing files.
///
/// Implementations are shared between concurrent jobs. No per-key locking is
/// implied: two jobs may materialize the same entry, and an entry may be
/// evicted while another job reads it (surfacing as an access error there).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Find a usable entry for `request`, or register a pending one.
    async fn lookup(&self, request: &CacheRequest) -> GridResult<CacheLookup>;

    /// The exact-key pending entry for `request`, created if needed.
    async fn pending(&self, request: &CacheRequest) -> GridResult<CacheEntry>;

    /// Bytes needed to materialize the given requests.
    fn estimate_required_space(&self, requests: &[&CacheRequest]) -> u64;

    /// Evict least recently used entries until `required` more bytes fit.
    async fn reserve(&self, required: u64) -> GridResult<ReserveOutcome>;

    /// Writer for a pending entry's backing file.
    async fn create_writer(&self, entry: &CacheEntry, concat_axis: AxisKind) -> GridResult<ZarrGridWriter>;

    /// Record a finished backing file and mark the entry materialized.
    async fn finalize(&self, entry: &CacheEntry, local_path: &Path) -> GridResult<CacheEntry>;

    /// Drop a partially written file; the entry stays pending.
    async fn abandon(&self, entry: &CacheEntry, writer: ZarrGridWriter);

    /// Delete an entry and its file. Returns whether it existed.
    async fn invalidate(&self, key: &CacheKey) -> GridResult<bool>;

    async fn stats(&self) -> GridResult<CacheStats>;

    async fn entries(&self) -> GridResult<Vec<CacheEntry>>;

    /// Delete every entry. Returns the number removed.
    async fn clear(&self) -> GridResult<usize>;
}

/// Cache store keeping Zarr datasets under a directory and records in SQLite.
pub struct DiskCacheStore {
    root: PathBuf,
    catalog: CacheCatalog,
    config: CacheConfig,
    write_options: ZarrWriteOptions,
    deriver: CacheKeyDeriver,
    classifier: OverlapClassifier,
}

impl DiskCacheStore {
    /// Open the store described by `config`, creating its directory and catalog.
    pub async fn open(config: CacheConfig, write_options: ZarrWriteOptions) -> GridResult<Self> {
        std::fs::create_dir_all(&config.cache_dir)
            .map_err(|e| GridError::access(config.cache_dir.display().to_string(), e))?;
        let catalog = CacheCatalog::open(&config.database_path()).await?;
        info!(
            cache_dir = %config.cache_dir.display(),
            max_bytes = config.max_bytes,
            strict = config.strict_capacity,
            "Opened disk cache"
        );
        Ok(Self::with_catalog(config, write_options, catalog))
    }

    /// Build a store around an existing catalog.
    pub fn with_catalog(
        config: CacheConfig,
        write_options: ZarrWriteOptions,
        catalog: CacheCatalog,
    ) -> Self {
        Self {
            root: config.cache_dir.clone(),
            classifier: OverlapClassifier::new(config.tolerance),
            catalog,
            config,
            write_options,
            deriver: CacheKeyDeriver,
        }
    }

    pub fn catalog(&self) -> &CacheCatalog {
        &self.catalog
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn into_shared(self) -> Arc<dyn CacheStore> {
        Arc::new(self)
    }

    /// Re-open a backing file and check it holds `variable` with the expected
    /// number of time steps.
    ///
    /// `Ok(false)` means the file is stale; an unreadable file is an error.
    fn validate_file(
        &self,
        entry: &CacheEntry,
        variable: &str,
        expected_time_len: Option<usize>,
    ) -> GridResult<bool> {
        let uri = entry.local_path.display().to_string();
        let store = FilesystemStore::new(&entry.local_path).map_err(|e| GridError::access(&uri, e))?;
        let source = ZarrSource::open(Arc::new(store), "/", uri.clone())?;
        let info = match source.variable(variable) {
            Ok(info) => info,
            Err(GridIoError::UnknownVariable { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let Some(expected) = expected_time_len else {
            return Ok(true);
        };
        let actual = info
            .axes
            .iter()
            .find(|a| a.kind.is_time())
            .map(|a| a.len());
        Ok(actual == Some(expected))
    }

    /// Delete a backing file if present.
    fn remove_file(&self, path: &Path) -> GridResult<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GridError::access(path.display().to_string(), e)),
        }
    }

    /// Look for a larger materialized entry that contains the request.
    async fn find_containing(&self, request: &CacheRequest) -> GridResult<Option<CacheEntry>> {
        let requested_time = request.time_slice();
        let candidates: Vec<CacheEntry> = self
            .catalog
            .materialized_for(&request.source_uri, &request.variable)
            .await?
            .into_iter()
            .filter(|c| match (c.time_slice, requested_time) {
                (Some(c), Some(r)) => c.start <= r.start && r.stop <= c.stop,
                (None, None) => true,
                _ => false,
            })
            .collect();

        let extents: Vec<_> = candidates.iter().map(|c| &c.extent).collect();
        let Some(best) = self
            .classifier
            .best_containing(&request.extent, extents.iter().copied())
        else {
            return Ok(None);
        };
        let candidate = candidates[best].clone();

        if !candidate.local_path.exists() {
            self.catalog.reset_pending(&candidate.key).await?;
            return Ok(None);
        }
        if !self.validate_file(&candidate, &request.variable, candidate.time_slice.map(|s| s.len()))? {
            self.remove_file(&candidate.local_path)?;
            self.catalog.reset_pending(&candidate.key).await?;
            return Ok(None);
        }
        Ok(Some(candidate))
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn lookup(&self, request: &CacheRequest) -> GridResult<CacheLookup> {
        let derived = self
            .deriver
            .derive(&request.source_uri, &request.variable, &request.slices);

        if let Some(entry) = self.catalog.get(&derived.key).await? {
            if entry.is_materialized() {
                let usable = if !entry.local_path.exists() {
                    debug!(key = %entry.key, "Cache file missing, resetting entry");
                    false
                } else if entry.dimensions != derived.dimensions {
                    debug!(
                        key = %entry.key,
                        stored = %entry.dimensions,
                        expected = %derived.dimensions,
                        "Cache entry dimensions differ"
                    );
                    self.remove_file(&entry.local_path)?;
                    false
                } else if !self.validate_file(&entry, &request.variable, request.time_slice().map(|s| s.len()))? {
                    debug!(key = %entry.key, "Cache file does not match the request");
                    self.remove_file(&entry.local_path)?;
                    false
                } else {
                    true
                };

                if usable {
                    self.catalog.touch(&entry.key, Utc::now()).await?;
                    counter!("domain_cache_hits_total").increment(1);
                    debug!(key = %entry.key, path = %entry.local_path.display(), "Cache hit");
                    return Ok(CacheLookup::Hit(entry));
                }
                self.catalog
                    .reassign(&entry.key, &derived.dimensions, request)
                    .await?;
            }
        }

        if let Some(entry) = self.find_containing(request).await? {
            self.catalog.touch(&entry.key, Utc::now()).await?;
            counter!("domain_cache_contained_hits_total").increment(1);
            debug!(key = %entry.key, path = %entry.local_path.display(), "Cache hit (containing entry)");
            return Ok(CacheLookup::Contained(entry));
        }

        let entry = self.pending(request).await?;
        counter!("domain_cache_misses_total").increment(1);
        debug!(key = %entry.key, source = %request.source_uri, "Cache miss");
        Ok(CacheLookup::Miss(entry))
    }

    async fn pending(&self, request: &CacheRequest) -> GridResult<CacheEntry> {
        let derived = self
            .deriver
            .derive(&request.source_uri, &request.variable, &request.slices);
        let path = self.root.join(format!("{}.zarr", derived.key));
        let entry = self
            .catalog
            .get_or_create(&derived.key, &derived.dimensions, request, &path)
            .await?;
        if entry.dimensions == derived.dimensions {
            return Ok(entry);
        }

        // The record under this key describes another extract
        debug!(
            key = %entry.key,
            stored = %entry.dimensions,
            expected = %derived.dimensions,
            "Reassigning cache record"
        );
        self.remove_file(&entry.local_path)?;
        self.catalog
            .reassign(&entry.key, &derived.dimensions, request)
            .await?;
        self.catalog
            .get(&entry.key)
            .await?
            .ok_or_else(|| GridError::internal(format!("cache record {} vanished", entry.key)))
    }

    fn estimate_required_space(&self, requests: &[&CacheRequest]) -> u64 {
        requests.iter().map(|r| r.estimated_bytes()).sum()
    }

    async fn reserve(&self, required: u64) -> GridResult<ReserveOutcome> {
        let max = self.config.max_bytes;
        let used = self.catalog.used_bytes().await?;
        let mut outcome = ReserveOutcome {
            required,
            ..Default::default()
        };

        let fits = |freed: u64| used.saturating_sub(freed).saturating_add(required) <= max;

        if fits(0) {
            outcome.satisfied = true;
            return Ok(outcome);
        }

        for entry in self.catalog.materialized_oldest_first().await? {
            if outcome.freed >= required && fits(outcome.freed) {
                break;
            }
            self.remove_file(&entry.local_path)?;
            self.catalog.delete(&entry.key).await?;
            outcome.freed += entry.size_bytes;
            outcome.evicted += 1;
            counter!("domain_cache_evictions_total").increment(1);
            counter!("domain_cache_evicted_bytes_total").increment(entry.size_bytes);
            debug!(
                key = %entry.key,
                size_bytes = entry.size_bytes,
                last_accessed = %entry.last_accessed,
                "Evicted cache entry"
            );
        }

        outcome.satisfied = fits(outcome.freed);
        if !outcome.satisfied {
            let available = max.saturating_sub(used.saturating_sub(outcome.freed));
            if self.config.strict_capacity {
                return Err(GridError::CapacityExceeded {
                    required,
                    available,
                });
            }
            warn!(
                required = required,
                available = available,
                "Cache capacity exceeded, continuing over budget"
            );
        }

        info!(
            required = required,
            freed = outcome.freed,
            evicted = outcome.evicted,
            "Reserved cache space"
        );
        Ok(outcome)
    }

    async fn create_writer(&self, entry: &CacheEntry, concat_axis: AxisKind) -> GridResult<ZarrGridWriter> {
        Ok(ZarrGridWriter::create(
            &entry.local_path,
            concat_axis,
            self.write_options.clone(),
        )?)
    }

    async fn finalize(&self, entry: &CacheEntry, local_path: &Path) -> GridResult<CacheEntry> {
        let metadata = std::fs::metadata(local_path)
            .map_err(|e| GridError::access(local_path.display().to_string(), e))?;
        let size_bytes = if metadata.is_dir() {
            dataset_size(local_path)
        } else {
            metadata.len()
        };

        if !self.catalog.mark_materialized(&entry.key, size_bytes).await? {
            return Err(GridError::access(
                format!("cache record {}", entry.key),
                "record removed while the entry was being written",
            ));
        }

        debug!(key = %entry.key, size_bytes = size_bytes, "Materialized cache entry");
        self.catalog
            .get(&entry.key)
            .await?
            .ok_or_else(|| GridError::internal(format!("cache record {} vanished", entry.key)))
    }

    async fn abandon(&self, entry: &CacheEntry, writer: ZarrGridWriter) {
        writer.abort();
        debug!(key = %entry.key, "Abandoned partial cache entry");
    }

    async fn invalidate(&self, key: &CacheKey) -> GridResult<bool> {
        let Some(entry) = self.catalog.get(key).await? else {
            return Ok(false);
        };
        self.remove_file(&entry.local_path)?;
        Ok(self.catalog.delete(key).await?)
    }

    async fn stats(&self) -> GridResult<CacheStats> {
        let (pending, materialized) = self.catalog.counts().await?;
        Ok(CacheStats {
            pending,
            materialized,
            used_bytes: self.catalog.used_bytes().await?,
            max_bytes: self.config.max_bytes,
        })
    }

    async fn entries(&self) -> GridResult<Vec<CacheEntry>> {
        Ok(self.catalog.all().await?)
    }

    async fn clear(&self) -> GridResult<usize> {
        let mut removed = 0;
        for entry in self.catalog.all().await? {
            if self.invalidate(&entry.key).await? {
                removed += 1;
            }
        }
        info!(removed = removed, "Cleared cache");
        Ok(removed)
    }
}
