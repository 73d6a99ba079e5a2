//! Cache configuration.

use std::path::PathBuf;

use grid_common::DEFAULT_TOLERANCE;
use serde::{Deserialize, Serialize};

/// Configuration for the on-disk cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding cached datasets.
    pub cache_dir: PathBuf,

    /// Upper bound on the total size of materialized entries.
    pub max_bytes: u64,

    /// Fail reservations that cannot be satisfied instead of overflowing.
    pub strict_capacity: bool,

    /// Catalog database path; `<cache_dir>/catalog.db` when unset.
    pub database: Option<PathBuf>,

    /// Coordinate tolerance for overlap classification.
    pub tolerance: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./data/cache"),
            max_bytes: 10 * 1024 * 1024 * 1024,
            strict_capacity: false,
            database: None,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl CacheConfig {
    /// Apply `CACHE_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("CACHE_DIR") {
            self.cache_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CACHE_MAX_GB") {
            if let Ok(gb) = val.parse::<u64>() {
                self.max_bytes = gb * 1024 * 1024 * 1024;
            }
        }

        if let Ok(val) = std::env::var("CACHE_MAX_BYTES") {
            if let Ok(bytes) = val.parse() {
                self.max_bytes = bytes;
            }
        }

        if let Ok(val) = std::env::var("CACHE_STRICT_CAPACITY") {
            self.strict_capacity = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("CACHE_DATABASE") {
            self.database = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("CACHE_TOLERANCE") {
            if let Ok(tol) = val.parse() {
                self.tolerance = tol;
            }
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("catalog.db"))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_bytes == 0 {
            return Err("cache max_bytes must be > 0".to_string());
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err("cache tolerance must be >= 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.tolerance, 0.001);
        assert!(!config.strict_capacity);
        assert_eq!(config.database_path(), PathBuf::from("./data/cache/catalog.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = CacheConfig {
            max_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
