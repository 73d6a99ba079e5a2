//! Cache record persistence using SQLite with sqlx.
//!
//! One row per cache entry, keyed by the entry's hash. The catalog only
//! stores records; backing files are managed by the store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use grid_common::{Domain, IndexSlice};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::entry::{CacheEntry, CacheRequest, EntryState};
use crate::error::CacheError;
use crate::key::CacheKey;

type Result<T> = std::result::Result<T, CacheError>;

type EntryRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    Option<String>,
    String,
    String,
);

const SELECT_COLUMNS: &str = r#"
    SELECT key, dimensions, source_uri, variable, local_path, size_bytes,
           state, extent, time_slice, created_at, last_accessed
    FROM cache_entries
"#;

/// Persistent index of cache entries.
#[derive(Debug, Clone)]
pub struct CacheCatalog {
    pool: SqlitePool,
}

impl CacheCatalog {
    /// Open or create the catalog database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::file(parent.display().to_string(), e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::create_schema(&pool).await?;
        info!(path = %path.display(), "Opened cache catalog");

        Ok(Self { pool })
    }

    /// Open an in-memory catalog (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::create_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                dimensions TEXT NOT NULL,
                source_uri TEXT NOT NULL,
                variable TEXT NOT NULL,
                local_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'pending',
                extent TEXT NOT NULL,
                time_slice TEXT,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_source ON cache_entries(source_uri, variable)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_accessed ON cache_entries(last_accessed)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!("{} WHERE key = ?", SELECT_COLUMNS))
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_entry).transpose()
    }

    /// Fetch the entry for `key`, creating a pending one if absent.
    pub async fn get_or_create(
        &self,
        key: &CacheKey,
        dimensions: &str,
        request: &CacheRequest,
        local_path: &Path,
    ) -> Result<CacheEntry> {
        if let Some(existing) = self.get(key).await? {
            debug!(key = %key, state = existing.state.as_str(), "Found existing cache record");
            return Ok(existing);
        }

        let now = timestamp(Utc::now());
        let extent = serde_json::to_string(&request.extent).map_err(|e| {
            CacheError::CorruptRecord {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO cache_entries
                (key, dimensions, source_uri, variable, local_path, size_bytes,
                 state, extent, time_slice, created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?, 0, 'pending', ?, ?, ?, ?)
            "#,
        )
        .bind(key.as_str())
        .bind(dimensions)
        .bind(&request.source_uri)
        .bind(&request.variable)
        .bind(local_path.display().to_string())
        .bind(&extent)
        .bind(request.time_slice().map(|s| s.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(key = %key, source = %request.source_uri, "Created pending cache record");

        self.get(key).await?.ok_or_else(|| CacheError::CorruptRecord {
            key: key.to_string(),
            reason: "record vanished after insert".to_string(),
        })
    }

    /// Record the final size and mark the entry materialized.
    pub async fn mark_materialized(&self, key: &CacheKey, size_bytes: u64) -> Result<bool> {
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET state = 'materialized', size_bytes = ?, last_accessed = ?
            WHERE key = ?
            "#,
        )
        .bind(size_bytes as i64)
        .bind(&now)
        .bind(key.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Return an entry to pending, e.g. after its backing file went missing.
    pub async fn reset_pending(&self, key: &CacheKey) -> Result<()> {
        sqlx::query("UPDATE cache_entries SET state = 'pending', size_bytes = 0 WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Return an entry to pending and describe it by `request` from now on.
    ///
    /// Used when the record under a key was written for a different
    /// extract (another variable, or other slices).
    pub async fn reassign(&self, key: &CacheKey, dimensions: &str, request: &CacheRequest) -> Result<()> {
        let extent = serde_json::to_string(&request.extent).map_err(|e| CacheError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            UPDATE cache_entries
            SET state = 'pending', size_bytes = 0, dimensions = ?, source_uri = ?,
                variable = ?, extent = ?, time_slice = ?
            WHERE key = ?
            "#,
        )
        .bind(dimensions)
        .bind(&request.source_uri)
        .bind(&request.variable)
        .bind(&extent)
        .bind(request.time_slice().map(|s| s.to_string()))
        .bind(key.as_str())
        .execute(&self.pool)
        .await?;

        debug!(key = %key, variable = %request.variable, "Reassigned cache record");
        Ok(())
    }

    /// Set the last access time of an entry.
    pub async fn touch(&self, key: &CacheKey, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE cache_entries SET last_accessed = ? WHERE key = ?")
            .bind(timestamp(at))
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Materialized entries extracted from one variable of one source.
    pub async fn materialized_for(&self, source_uri: &str, variable: &str) -> Result<Vec<CacheEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "{} WHERE source_uri = ? AND variable = ? AND state = 'materialized'",
            SELECT_COLUMNS
        ))
        .bind(source_uri)
        .bind(variable)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    /// Materialized entries, least recently used first.
    pub async fn materialized_oldest_first(&self) -> Result<Vec<CacheEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "{} WHERE state = 'materialized' ORDER BY last_accessed ASC, created_at ASC, key ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    /// Every record, most recently used first.
    pub async fn all(&self) -> Result<Vec<CacheEntry>> {
        let rows: Vec<EntryRow> =
            sqlx::query_as(&format!("{} ORDER BY last_accessed DESC", SELECT_COLUMNS))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    /// Total size of materialized entries.
    pub async fn used_bytes(&self) -> Result<u64> {
        let sum: (Option<i64>,) = sqlx::query_as(
            "SELECT SUM(size_bytes) FROM cache_entries WHERE state = 'materialized'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(sum.0.unwrap_or(0).max(0) as u64)
    }

    /// Number of (pending, materialized) records.
    pub async fn counts(&self) -> Result<(u64, u64)> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM cache_entries GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut pending = 0;
        let mut materialized = 0;
        for (state, count) in rows {
            match EntryState::from_str(&state) {
                EntryState::Pending => pending += count as u64,
                EntryState::Materialized => materialized += count as u64,
            }
        }
        Ok((pending, materialized))
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_entry(row: EntryRow) -> Result<CacheEntry> {
    let key = CacheKey::from_hex(row.0);
    let extent: Domain = serde_json::from_str(&row.7).map_err(|e| CacheError::CorruptRecord {
        key: key.to_string(),
        reason: format!("extent: {}", e),
    })?;
    let time_slice = match row.8 {
        Some(s) => Some(s.parse::<IndexSlice>().map_err(|reason| CacheError::CorruptRecord {
            key: key.to_string(),
            reason,
        })?),
        None => None,
    };

    Ok(CacheEntry {
        key,
        dimensions: row.1,
        source_uri: row.2,
        variable: row.3,
        local_path: PathBuf::from(row.4),
        size_bytes: row.5.max(0) as u64,
        state: EntryState::from_str(&row.6),
        extent,
        time_slice,
        created_at: parse_timestamp(&row.9),
        last_accessed: parse_timestamp(&row.10),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use grid_common::{AxisKind, AxisRange};

    fn request(uri: &str, lat: (usize, usize)) -> CacheRequest {
        CacheRequest {
            source_uri: uri.to_string(),
            variable: "tas".to_string(),
            slices: vec![
                (AxisKind::Time, IndexSlice::new(0, 4, 1)),
                (AxisKind::Latitude, IndexSlice::new(lat.0, lat.1, 1)),
            ],
            extent: Domain::new().with(
                AxisKind::Latitude,
                AxisRange::values(lat.0 as f64, lat.1 as f64 - 1.0),
            ),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let catalog = CacheCatalog::open_memory().await.unwrap();
        let key = CacheKey::from_hex("abc");
        let req = request("u", (0, 10));

        let first = catalog
            .get_or_create(&key, "tas!d", &req, Path::new("/c/abc.zarr"))
            .await
            .unwrap();
        assert_eq!(first.state, EntryState::Pending);
        assert_eq!(first.time_slice, Some(IndexSlice::new(0, 4, 1)));
        assert_eq!(first.extent, req.extent);

        let second = catalog
            .get_or_create(&key, "tas!other", &req, Path::new("/elsewhere"))
            .await
            .unwrap();
        assert_eq!(second.dimensions, "tas!d");
        assert_eq!(second.local_path, PathBuf::from("/c/abc.zarr"));
    }

    #[tokio::test]
    async fn test_materialize_and_used_bytes() {
        let catalog = CacheCatalog::open_memory().await.unwrap();
        for (name, size) in [("a", 100u64), ("b", 250)] {
            let key = CacheKey::from_hex(name);
            catalog
                .get_or_create(&key, "d", &request(name, (0, 2)), Path::new(name))
                .await
                .unwrap();
            assert!(catalog.mark_materialized(&key, size).await.unwrap());
        }
        catalog
            .get_or_create(&CacheKey::from_hex("c"), "d", &request("c", (0, 2)), Path::new("c"))
            .await
            .unwrap();

        assert_eq!(catalog.used_bytes().await.unwrap(), 350);
        assert_eq!(catalog.counts().await.unwrap(), (1, 2));

        catalog.reset_pending(&CacheKey::from_hex("b")).await.unwrap();
        assert_eq!(catalog.used_bytes().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_reassign_rewrites_descriptor() {
        let catalog = CacheCatalog::open_memory().await.unwrap();
        let key = CacheKey::from_hex("k");
        catalog
            .get_or_create(&key, "tas!d", &request("u", (0, 2)), Path::new("/c/k.zarr"))
            .await
            .unwrap();
        catalog.mark_materialized(&key, 40).await.unwrap();

        let mut pr = request("u", (0, 5));
        pr.variable = "pr".to_string();
        catalog.reassign(&key, "pr!d", &pr).await.unwrap();

        let entry = catalog.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(entry.size_bytes, 0);
        assert_eq!(entry.variable, "pr");
        assert_eq!(entry.dimensions, "pr!d");
        assert_eq!(entry.extent, pr.extent);
        assert_eq!(entry.local_path, PathBuf::from("/c/k.zarr"));
    }

    #[tokio::test]
    async fn test_oldest_first_ordering() {
        let catalog = CacheCatalog::open_memory().await.unwrap();
        let now = Utc::now();
        for (name, age_min) in [("new", 1i64), ("old", 30), ("mid", 10)] {
            let key = CacheKey::from_hex(name);
            catalog
                .get_or_create(&key, "d", &request(name, (0, 2)), Path::new(name))
                .await
                .unwrap();
            catalog.mark_materialized(&key, 1).await.unwrap();
            catalog.touch(&key, now - Duration::minutes(age_min)).await.unwrap();
        }

        let order: Vec<String> = catalog
            .materialized_oldest_first()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key.to_string())
            .collect();
        assert_eq!(order, vec!["old", "mid", "new"]);
    }

    #[tokio::test]
    async fn test_materialized_for_filters_source() {
        let catalog = CacheCatalog::open_memory().await.unwrap();
        for (name, uri) in [("k1", "u1"), ("k2", "u1"), ("k3", "u2")] {
            let key = CacheKey::from_hex(name);
            catalog
                .get_or_create(&key, "d", &request(uri, (0, 2)), Path::new(name))
                .await
                .unwrap();
        }
        catalog.mark_materialized(&CacheKey::from_hex("k1"), 5).await.unwrap();
        catalog.mark_materialized(&CacheKey::from_hex("k3"), 5).await.unwrap();

        let found = catalog.materialized_for("u1", "tas").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.as_str(), "k1");
        assert!(catalog.materialized_for("u1", "pr").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let catalog = CacheCatalog::open_memory().await.unwrap();
        let key = CacheKey::from_hex("gone");
        catalog
            .get_or_create(&key, "d", &request("u", (0, 2)), Path::new("x"))
            .await
            .unwrap();
        assert!(catalog.delete(&key).await.unwrap());
        assert!(!catalog.delete(&key).await.unwrap());
        assert!(catalog.get(&key).await.unwrap().is_none());
    }
}
