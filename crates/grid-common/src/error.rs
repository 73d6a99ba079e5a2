//! Error types for grid retrieval.

use thiserror::Error;

/// Result type alias using GridError.
pub type GridResult<T> = Result<T, GridError>;

/// Primary error type for retrieval operations.
///
/// Only [`GridError::Access`] is considered transient; every other kind is a
/// property of the request or the data and fails the job permanently.
#[derive(Debug, Error)]
pub enum GridError {
    // === Transient ===
    #[error("Failed to access '{resource}': {reason}")]
    Access { resource: String, reason: String },

    // === Data shape ===
    #[error("Read produced an empty shape {shape:?}")]
    InvalidShape { shape: Vec<usize> },

    #[error("Domain does not map to any input: {0}")]
    DomainMapping(String),

    #[error("Mismatching shapes: {0}")]
    ShapeMismatch(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    // === Job control ===
    #[error("Job was cancelled")]
    Cancelled,

    #[error("Cache capacity exceeded: need {required} bytes, {available} available")]
    CapacityExceeded { required: u64, available: u64 },

    // === Infrastructure ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GridError {
    pub fn access(resource: impl Into<String>, reason: impl ToString) -> Self {
        GridError::Access {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    pub fn domain_mapping(msg: impl Into<String>) -> Self {
        GridError::DomainMapping(msg.into())
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        GridError::ShapeMismatch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        GridError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GridError::Internal(msg.into())
    }

    /// Whether an orchestrator may retry the job that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GridError::Access { .. })
    }

    /// Stable name of the error kind, used in status reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GridError::Access { .. } => "AccessError",
            GridError::InvalidShape { .. } => "InvalidShapeError",
            GridError::DomainMapping(_) => "DomainMappingError",
            GridError::ShapeMismatch(_) => "ShapeMismatchError",
            GridError::InvalidDomain(_) => "InvalidDomainError",
            GridError::Cancelled => "Cancelled",
            GridError::CapacityExceeded { .. } => "CapacityExceeded",
            GridError::Config(_) => "ConfigError",
            GridError::Internal(_) => "InternalError",
        }
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::access("filesystem", err)
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Internal(format!("JSON error: {}", err))
    }
}
