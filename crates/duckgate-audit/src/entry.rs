//! Audit entry types.
//!
//! One entry is written per query attempt, whether it was executed, denied
//! before execution or failed during execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a query attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// Authorized and executed.
    Allowed,
    /// Rejected before execution (validation, privilege, unknown object).
    Denied,
    /// Authorized but execution failed.
    Failed,
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "ALLOWED"),
            Self::Denied => write!(f, "DENIED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Action recorded for gateway queries.
pub const ACTION_QUERY: &str = "QUERY";

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,

    pub occurred_at: DateTime<Utc>,

    /// Principal name as submitted, even when unknown.
    pub principal: String,

    pub action: String,

    pub status: AuditStatus,

    /// `SELECT`, `WRITE`, `DDL` or `UNSUPPORTED`, when classification ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_kind: Option<String>,

    pub original_sql: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_sql: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,

    /// Endpoint name, or `local`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute: Option<String>,

    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(
        status: AuditStatus,
        principal: impl Into<String>,
        action: impl Into<String>,
        original_sql: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            principal: principal.into(),
            action: action.into(),
            status,
            statement_kind: None,
            original_sql: original_sql.into(),
            rewritten_sql: None,
            tables: Vec::new(),
            compute: None,
            duration_ms: 0,
            row_count: None,
            error: None,
        }
    }

    pub fn builder(
        status: AuditStatus,
        principal: impl Into<String>,
        original_sql: impl Into<String>,
    ) -> AuditEntryBuilder {
        AuditEntryBuilder {
            entry: AuditEntry::new(status, principal, ACTION_QUERY, original_sql),
        }
    }

    /// Format: `[timestamp] STATUS principal=... action=... [sql=...]`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} principal={} action={}",
            self.occurred_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.status,
            self.principal,
            self.action,
        );

        if let Some(ref kind) = self.statement_kind {
            line.push_str(&format!(" kind={}", kind));
        }

        let sql = self.rewritten_sql.as_ref().unwrap_or(&self.original_sql);
        let sql_preview: String = if sql.chars().count() > 100 {
            format!("{}...", sql.chars().take(100).collect::<String>())
        } else {
            sql.clone()
        };
        line.push_str(&format!(" sql=\"{}\"", sql_preview.replace('\n', " ")));

        if !self.tables.is_empty() {
            line.push_str(&format!(" tables=[{}]", self.tables.join(",")));
        }
        if let Some(ref compute) = self.compute {
            line.push_str(&format!(" compute={}", compute));
        }
        if let Some(rows) = self.row_count {
            line.push_str(&format!(" rows={}", rows));
        }
        line.push_str(&format!(" duration_ms={}", self.duration_ms));
        if let Some(ref error) = self.error {
            line.push_str(&format!(" error=\"{}\"", error.replace('"', "'")));
        }

        line
    }
}

/// Builder for audit entries.
#[derive(Debug)]
pub struct AuditEntryBuilder {
    entry: AuditEntry,
}

impl AuditEntryBuilder {
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.entry.action = action.into();
        self
    }

    pub fn statement_kind(mut self, kind: impl Into<String>) -> Self {
        self.entry.statement_kind = Some(kind.into());
        self
    }

    pub fn rewritten_sql(mut self, sql: impl Into<String>) -> Self {
        self.entry.rewritten_sql = Some(sql.into());
        self
    }

    pub fn tables(mut self, tables: Vec<String>) -> Self {
        self.entry.tables = tables;
        self
    }

    pub fn compute(mut self, compute: impl Into<String>) -> Self {
        self.entry.compute = Some(compute.into());
        self
    }

    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.entry.duration_ms = duration;
        self
    }

    pub fn row_count(mut self, count: u64) -> Self {
        self.entry.row_count = Some(count);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.entry.error = Some(error.into());
        self
    }

    pub fn build(self) -> AuditEntry {
        self.entry
    }
}
