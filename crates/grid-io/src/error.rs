//! Error types for dataset access.

use grid_common::GridError;
use thiserror::Error;

/// Errors that can occur while opening, reading or writing datasets.
#[derive(Error, Debug)]
pub enum GridIoError {
    /// The dataset could not be opened.
    #[error("failed to open '{uri}': {reason}")]
    OpenFailed { uri: String, reason: String },

    /// Data could not be read from an open dataset.
    #[error("failed to read '{uri}': {reason}")]
    ReadFailed { uri: String, reason: String },

    /// Data could not be written.
    #[error("failed to write '{path}': {reason}")]
    WriteFailed { path: String, reason: String },

    /// Dataset attributes are missing or inconsistent with the array.
    #[error("invalid dataset metadata in '{uri}': {reason}")]
    InvalidMetadata { uri: String, reason: String },

    /// The dataset does not hold the requested variable.
    #[error("variable '{variable}' not found in '{uri}'")]
    UnknownVariable { uri: String, variable: String },

    /// A selection or chunk does not fit the dataset's shape.
    #[error("shape error: {0}")]
    Shape(String),

    /// Unsupported URI or bad storage configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for dataset access.
pub type Result<T> = std::result::Result<T, GridIoError>;

impl GridIoError {
    pub fn open_failed(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::OpenFailed {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn read_failed(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::ReadFailed {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write_failed(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::WriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_metadata(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidMetadata {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure happened before any data was touched.
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::OpenFailed { .. } | Self::InvalidMetadata { .. }
        )
    }
}

impl From<GridIoError> for GridError {
    fn from(err: GridIoError) -> Self {
        match err {
            GridIoError::OpenFailed { uri, reason } => GridError::Access {
                resource: uri,
                reason: format!("open failed: {}", reason),
            },
            GridIoError::ReadFailed { uri, reason } => GridError::Access {
                resource: uri,
                reason: format!("read failed: {}", reason),
            },
            GridIoError::WriteFailed { path, reason } => GridError::Access {
                resource: path,
                reason: format!("write failed: {}", reason),
            },
            GridIoError::InvalidMetadata { uri, reason } => GridError::Access {
                resource: uri,
                reason: format!("cannot be parsed: {}", reason),
            },
            GridIoError::UnknownVariable { uri, variable } => GridError::Access {
                resource: uri,
                reason: format!("variable '{}' not found", variable),
            },
            GridIoError::Shape(msg) => GridError::ShapeMismatch(msg),
            GridIoError::Config(msg) => GridError::Config(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_read_failures_become_access_errors() {
        let err: GridError = GridIoError::open_failed("s3://b/x.zarr", "timeout").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("open failed"));

        let err: GridError = GridIoError::read_failed("/tmp/x.zarr", "eof").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("read failed"));
    }

    #[test]
    fn test_shape_errors_are_fatal() {
        let err: GridError = GridIoError::Shape("lat 10 vs 12".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "ShapeMismatchError");
    }
}
