//! Error types for the audit crate.

use thiserror::Error;

/// Errors that can occur during audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to initialize the audit logger.
    #[error("failed to initialize audit logger: {0}")]
    InitializationFailed(String),

    /// Failed to record an entry.
    #[error("failed to record audit entry: {0}")]
    LogFailed(String),

    /// Storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AuditError> for duckgate_core::GatewayError {
    fn from(err: AuditError) -> Self {
        duckgate_core::GatewayError::Internal(err.to_string())
    }
}
