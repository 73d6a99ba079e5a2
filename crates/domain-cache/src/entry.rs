//! Cache records and lookup requests.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use grid_common::{AxisKind, Domain, IndexSlice};

use crate::key::CacheKey;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Known miss; the backing file is absent or being written.
    Pending,
    /// Backing file complete and its size recorded.
    Materialized,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Materialized => "materialized",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "materialized" => Self::Materialized,
            _ => Self::Pending,
        }
    }
}

/// One cached extract and its backing file.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub dimensions: String,
    pub source_uri: String,
    pub variable: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub state: EntryState,
    /// Coordinate-space extent of the extract.
    pub extent: Domain,
    /// Source time indices covered, if the variable has a time axis.
    pub time_slice: Option<IndexSlice>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_materialized(&self) -> bool {
        self.state == EntryState::Materialized
    }
}

/// An extract a job is about to read from a source.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub source_uri: String,
    pub variable: String,
    /// Index slices of every axis of the variable, in array order.
    pub slices: Vec<(AxisKind, IndexSlice)>,
    /// Coordinate-space extent of the same selection.
    pub extent: Domain,
}

impl CacheRequest {
    pub fn time_slice(&self) -> Option<IndexSlice> {
        self.slices
            .iter()
            .find(|(k, _)| k.is_time())
            .map(|(_, s)| *s)
    }

    pub fn element_count(&self) -> u64 {
        self.slices.iter().map(|(_, s)| s.len() as u64).product()
    }

    /// Uncompressed size of the extract as 32-bit floats.
    pub fn estimated_bytes(&self) -> u64 {
        self.element_count() * std::mem::size_of::<f32>() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_estimate() {
        let request = CacheRequest {
            source_uri: "u".into(),
            variable: "tas".into(),
            slices: vec![
                (AxisKind::Time, IndexSlice::new(0, 10, 1)),
                (AxisKind::Latitude, IndexSlice::new(0, 20, 2)),
                (AxisKind::Longitude, IndexSlice::new(5, 15, 1)),
            ],
            extent: Domain::new(),
        };
        assert_eq!(request.element_count(), 10 * 10 * 10);
        assert_eq!(request.estimated_bytes(), 4000);
        assert_eq!(request.time_slice(), Some(IndexSlice::new(0, 10, 1)));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(EntryState::from_str("materialized"), EntryState::Materialized);
        assert_eq!(EntryState::from_str("pending"), EntryState::Pending);
        assert_eq!(EntryState::from_str("???"), EntryState::Pending);
    }
}
