//! Error types shared by the lifecycle core and both transport surfaces

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Error taxonomy understood by every transport.
///
/// Side-channel failures (versioning, experiment tracking) never surface
/// through this type; they are logged where they happen.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown model type: {0}")]
    UnknownCapability(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ServiceError::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServiceError::Internal(msg.into())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal(format!("IO error: {}", err))
    }
}

impl From<polars::error::PolarsError> for ServiceError {
    fn from(err: polars::error::PolarsError) -> Self {
        ServiceError::Internal(format!("Data error: {}", err))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("Serialization error: {}", err))
    }
}

impl From<ndarray::ShapeError> for ServiceError {
    fn from(err: ndarray::ShapeError) -> Self {
        ServiceError::Internal(format!("Invalid shape: {}", err))
    }
}
