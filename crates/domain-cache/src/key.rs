//! Deterministic cache keys.

use std::fmt;

use grid_common::{AxisKind, IndexSlice};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 identifying one cached extract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a key read back from the catalog.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key plus the human-readable descriptor of the same request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: CacheKey,
    /// `var!lat:0:10:1|lon:5:20:1|time:0:12:1`, axes sorted by name.
    pub dimensions: String,
}

/// Builds cache keys from a source URI and per-axis index slices.
///
/// Only the URI, the time slice and the latitude and longitude slices are
/// hashed, always in that order. Level and other axes are left out of the
/// key; they still appear in the dimension descriptor, which is compared
/// when an entry is reused.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyDeriver;

impl CacheKeyDeriver {
    pub fn derive(
        &self,
        source_uri: &str,
        variable: &str,
        slices: &[(AxisKind, IndexSlice)],
    ) -> DerivedKey {
        let find = |kind: &AxisKind| {
            slices
                .iter()
                .find(|(k, _)| k == kind)
                .map(|(_, s)| s.to_string())
                .unwrap_or_else(|| "None".to_string())
        };

        let mut hasher = Sha256::new();
        hasher.update(source_uri.as_bytes());
        hasher.update(find(&AxisKind::Time).as_bytes());
        hasher.update(find(&AxisKind::Latitude).as_bytes());
        hasher.update(find(&AxisKind::Longitude).as_bytes());
        let key = CacheKey(hex::encode(hasher.finalize()));

        DerivedKey {
            key,
            dimensions: dimension_descriptor(variable, slices),
        }
    }
}

fn dimension_descriptor(variable: &str, slices: &[(AxisKind, IndexSlice)]) -> String {
    let mut parts: Vec<String> = slices
        .iter()
        .map(|(kind, slice)| format!("{}:{}", kind, slice))
        .collect();
    parts.sort();
    format!("{}!{}", variable, parts.join("|"))
}
