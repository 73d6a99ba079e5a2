//! Zarr output settings.

use serde::{Deserialize, Serialize};

/// Settings for datasets written by [`crate::ZarrGridWriter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZarrWriteOptions {
    /// Compression codec.
    pub compression: ZarrCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub shuffle: bool,
}

impl Default for ZarrWriteOptions {
    fn default() -> Self {
        Self {
            compression: ZarrCompression::BloscZstd,
            compression_level: 1,
            shuffle: true,
        }
    }
}

impl ZarrWriteOptions {
    /// Uncompressed output, mostly useful in tests.
    pub fn uncompressed() -> Self {
        Self {
            compression: ZarrCompression::None,
            ..Self::default()
        }
    }

    /// Apply `ZARR_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            self.compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                self.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            self.shuffle = val.to_lowercase() == "true" || val == "1";
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.compression != ZarrCompression::None
            && (self.compression_level == 0 || self.compression_level > 9)
        {
            return Err("compression_level must be 1-9".to_string());
        }
        Ok(())
    }
}

/// Compression codec for Zarr files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    None,
    Lz4,
    Zstd,
    BloscLz4,
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive). Unknown names fall back to blosc_zstd.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" => Self::Lz4,
            "zstd" => Self::Zstd,
            "blosc_lz4" => Self::BloscLz4,
            "blosc_zstd" => Self::BloscZstd,
            _ => Self::BloscZstd,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_names() {
        assert_eq!(ZarrCompression::from_str("NONE"), ZarrCompression::None);
        assert_eq!(ZarrCompression::from_str("blosc_lz4"), ZarrCompression::BloscLz4);
        assert_eq!(ZarrCompression::from_str("bogus"), ZarrCompression::BloscZstd);
        assert_eq!(ZarrCompression::Zstd.to_string(), "zstd");
    }

    #[test]
    fn test_validate_level() {
        let mut opts = ZarrWriteOptions::default();
        assert!(opts.validate().is_ok());
        opts.compression_level = 0;
        assert!(opts.validate().is_err());
        assert!(ZarrWriteOptions {
            compression_level: 0,
            ..ZarrWriteOptions::uncompressed()
        }
        .validate()
        .is_ok());
    }
}
