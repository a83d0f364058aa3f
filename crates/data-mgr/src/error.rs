//! Error types for the variable cache and grid construction.

use thiserror::Error;

/// Errors that can occur while materializing variables.
#[derive(Error, Debug)]
pub enum DataMgrError {
    /// The region cache is exhausted and every resident region is locked.
    #[error("failed to allocate {bytes} bytes: cache exhausted and no unlocked region to evict")]
    AllocationFailure { bytes: usize },

    /// I/O or format error reported by the data collection.
    #[error("failed to read variable data: {0}")]
    ReadFailure(String),

    /// The coordinate variables match none of the supported grid layouts.
    #[error("unsupported grid topology: {0}")]
    UnsupportedTopology(String),

    /// The query box is malformed or does not intersect the grid.
    #[error("invalid extents: {0}")]
    InvalidExtents(String),

    /// A coordinate variable required by the requested variable is absent.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// The requested variable is not known to the data collection.
    #[error("variable not found: {0}")]
    VariableNotFound(String),

    /// Metadata reported by the data collection is inconsistent.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl DataMgrError {
    /// Create a ReadFailure error.
    pub fn read_failure(msg: impl Into<String>) -> Self {
        Self::ReadFailure(msg.into())
    }

    /// Create an UnsupportedTopology error.
    pub fn unsupported_topology(msg: impl Into<String>) -> Self {
        Self::UnsupportedTopology(msg.into())
    }

    /// Create an InvalidExtents error.
    pub fn invalid_extents(msg: impl Into<String>) -> Self {
        Self::InvalidExtents(msg.into())
    }

    /// Create a MissingDependency error.
    pub fn missing_dependency(msg: impl Into<String>) -> Self {
        Self::MissingDependency(msg.into())
    }

    /// Create a VariableNotFound error.
    pub fn variable_not_found(msg: impl Into<String>) -> Self {
        Self::VariableNotFound(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Create a ConfigError.
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

impl From<std::io::Error> for DataMgrError {
    fn from(err: std::io::Error) -> Self {
        Self::ReadFailure(err.to_string())
    }
}

impl From<serde_json::Error> for DataMgrError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Result type for data manager operations.
pub type Result<T> = std::result::Result<T, DataMgrError>;
