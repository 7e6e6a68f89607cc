//! Gateway-wide error taxonomy.
//!
//! Every component converts its own error type into [`GatewayError`] at the
//! crate boundary. The HTTP (or CLI) layer maps the variants to status codes
//! with [`GatewayError::status_code`].

use thiserror::Error;

/// Classified error returned by every gateway operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or unsupported statement, missing required field.
    #[error("validation error: {0}")]
    Validation(String),

    /// A privilege check failed.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Unknown table, endpoint or principal.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate or otherwise conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Remote compute agent unreachable, erroring or timed out.
    #[error("remote compute unavailable: {0}")]
    RemoteUnavailable(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Anything unclassified. The message is internal detail and is never
    /// shown to callers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn remote_unavailable(msg: impl Into<String>) -> Self {
        Self::RemoteUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::AccessDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RemoteUnavailable(_) => 502,
            Self::Cancelled => 499,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::RemoteUnavailable(_) => "REMOTE_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to a caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error was raised before any execution took place.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::AccessDenied(_) | Self::NotFound(_)
        )
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::InvalidReference(msg) => Self::Validation(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Errors raised by RBAC store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("store lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::validation("x").status_code(), 400);
        assert_eq!(GatewayError::access_denied("x").status_code(), 403);
        assert_eq!(GatewayError::not_found("x").status_code(), 404);
        assert_eq!(GatewayError::conflict("x").status_code(), 409);
        assert_eq!(GatewayError::remote_unavailable("x").status_code(), 502);
        assert_eq!(GatewayError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = GatewayError::internal("connection string postgres://secret");
        assert_eq!(err.public_message(), "internal error");
        assert!(err.to_string().contains("secret"));
    }

    #[test]
    fn test_store_error_classification() {
        let err: GatewayError = StoreError::Conflict("dup".into()).into();
        assert!(matches!(err, GatewayError::Conflict(_)));

        let err: GatewayError = StoreError::Backend("disk".into()).into();
        assert!(matches!(err, GatewayError::Internal(_)));
    }
}
