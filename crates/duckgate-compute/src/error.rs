//! Error types for the compute crate.

use duckgate_core::{GatewayError, StoreError};
use thiserror::Error;

/// Errors raised while resolving a compute target or executing SQL on it.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Endpoint configuration the gateway cannot use.
    #[error("invalid endpoint configuration: {0}")]
    InvalidEndpoint(String),

    /// An assignment names an endpoint that does not exist.
    #[error("compute endpoint '{0}' not found")]
    EndpointNotFound(String),

    /// The remote agent could not be reached, timed out or returned an error.
    #[error("compute endpoint '{endpoint}' unavailable: {reason}")]
    RemoteUnavailable { endpoint: String, reason: String },

    /// The engine rejected or failed the statement.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("result exceeds the limit of {0} rows")]
    ResultTooLarge(usize),

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("query cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<duckdb::Error> for ComputeError {
    fn from(err: duckdb::Error) -> Self {
        ComputeError::Execution(err.to_string())
    }
}

impl From<StoreError> for ComputeError {
    fn from(err: StoreError) -> Self {
        ComputeError::Gateway(err.into())
    }
}

impl From<ComputeError> for GatewayError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::Gateway(inner) => inner,
            ComputeError::InvalidEndpoint(_) => GatewayError::Validation(err.to_string()),
            ComputeError::EndpointNotFound(_) => GatewayError::NotFound(err.to_string()),
            ComputeError::RemoteUnavailable { .. } => {
                GatewayError::RemoteUnavailable(err.to_string())
            }
            ComputeError::Execution(_) | ComputeError::ResultTooLarge(_) => {
                GatewayError::Validation(err.to_string())
            }
            ComputeError::Cancelled => GatewayError::Cancelled,
            ComputeError::Timeout(_) | ComputeError::Internal(_) => {
                GatewayError::Internal(err.to_string())
            }
        }
    }
}
