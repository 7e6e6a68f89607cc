//! Error types for the rewrite crate.

use duckgate_core::{GatewayError, Privilege};
use thiserror::Error;

/// Errors raised while analyzing, authorizing or rewriting a statement.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {0}")]
    ParseError(String),

    #[error("empty statement")]
    EmptyStatement,

    #[error("multiple statements are not allowed")]
    MultipleStatements,

    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("function '{0}' is not allowed")]
    FunctionNotAllowed(String),

    #[error("table function '{0}' is not allowed")]
    TableFunctionNotAllowed(String),

    /// A CTE name would hide a real table from authorization.
    #[error("common table expression '{0}' shadows an existing table")]
    CteShadowsTable(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("{privilege} privilege required on {securable}")]
    AccessDenied {
        privilege: Privilege,
        securable: String,
    },

    /// A clause on a policy-protected table reference that cannot be kept
    /// once the reference becomes a subquery.
    #[error("{clause} is not supported on '{table}' while row filters or column masks apply")]
    UnsupportedTableClause { clause: String, table: String },

    /// A stored row filter or column mask is not a single valid expression.
    #[error("invalid policy expression '{expression}': {reason}")]
    InvalidPolicy { expression: String, reason: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<RewriteError> for GatewayError {
    fn from(err: RewriteError) -> Self {
        match err {
            RewriteError::Gateway(inner) => inner,
            RewriteError::TableNotFound(_) => GatewayError::NotFound(err.to_string()),
            RewriteError::AccessDenied { .. } => GatewayError::AccessDenied(err.to_string()),
            RewriteError::InvalidPolicy { .. } => GatewayError::Internal(err.to_string()),
            other => GatewayError::Validation(other.to_string()),
        }
    }
}
