//! Execution results and targets.

use std::fmt;

use duckgate_core::ComputeEndpoint;
use serde::{Deserialize, Serialize};

/// Name reported for in-process execution.
pub const LOCAL_TARGET: &str = "local";

/// Rows returned by a local or remote execution.
///
/// Local execution yields native JSON values; remote execution yields
/// strings (or null), as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: u64,
}

impl ExecutionResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        let row_count = rows.len() as u64;
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// Value at (`row`, `column name`).
    pub fn value(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)
    }
}

/// Where a statement runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeTarget {
    Local,
    Remote(ComputeEndpoint),
}

impl ComputeTarget {
    pub fn name(&self) -> &str {
        match self {
            Self::Local => LOCAL_TARGET,
            Self::Remote(endpoint) => &endpoint.name,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unreachable,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Unreachable => f.write_str("unreachable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub endpoint_name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duckdb_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            status: HealthStatus::Healthy,
            duckdb_version: None,
            uptime_seconds: None,
            error: None,
        }
    }

    pub fn unreachable(endpoint_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unreachable,
            error: Some(error.into()),
            ..Self::healthy(endpoint_name)
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
