//! Retrieval configuration.

use std::path::{Path, PathBuf};

use domain_cache::CacheConfig;
use grid_common::{GridError, GridResult};
use grid_io::ZarrWriteOptions;
use serde::{Deserialize, Serialize};

/// Configuration for the retrieval pipeline and the cache it uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// On-disk cache settings.
    pub cache: CacheConfig,

    /// Directory receiving job outputs.
    pub output_dir: PathBuf,

    /// Chunk length along a spatial axis when a job reduces over time.
    pub spatial_step: usize,

    /// Maximum number of time steps read per chunk.
    pub time_block_len: usize,

    /// Codec settings for outputs and cache files.
    #[serde(flatten)]
    pub zarr: ZarrWriteOptions,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            output_dir: PathBuf::from("./data/output"),
            spatial_step: 20,
            time_block_len: 10,
            zarr: ZarrWriteOptions::default(),
        }
    }
}

impl RetrievalConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a YAML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> GridResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GridError::config(format!("{}: {}", path.display(), e)))?;
        let mut config: Self = serde_yaml::from_str(&text)
            .map_err(|e| GridError::config(format!("{}: {}", path.display(), e)))?;
        config.apply_env();
        Ok(config)
    }

    /// Override fields from environment variables.
    pub fn apply_env(&mut self) {
        self.cache.apply_env();
        self.zarr.apply_env();

        if let Ok(val) = std::env::var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PARTITION_SPATIAL_STEP") {
            if let Ok(step) = val.parse() {
                self.spatial_step = step;
            }
        }

        if let Ok(val) = std::env::var("PARTITION_TIME_BLOCK") {
            if let Ok(len) = val.parse() {
                self.time_block_len = len;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.spatial_step == 0 {
            return Err("spatial_step must be > 0".to_string());
        }

        if self.time_block_len == 0 {
            return Err("time_block_len must be > 0".to_string());
        }

        self.cache.validate()?;
        self.zarr.validate()?;

        Ok(())
    }
}
