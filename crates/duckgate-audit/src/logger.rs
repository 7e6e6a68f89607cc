//! Audit logger implementation.
//!
//! [`AuditLogger`] picks a storage backend from [`AuditConfig`] and is the
//! [`AuditSink`] the engine writes to.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckgate_core::AuditConfig;

use crate::entry::{AuditEntry, AuditStatus};
use crate::error::AuditError;
use crate::storage::{
    AuditStorage, ConsoleStorage, DualStorage, FileStorage, MemoryStorage, NullStorage,
};

/// Append-only destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn insert(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// The main audit logger.
pub struct AuditLogger {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
}

impl AuditLogger {
    /// Create a logger from configuration.
    ///
    /// | `file_path` | `stdout` | backend |
    /// |-------------|----------|---------|
    /// | set         | false    | file    |
    /// | set         | true     | file + console |
    /// | unset       | false    | memory  |
    /// | unset       | true     | console |
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        let storage: Arc<dyn AuditStorage> = if !config.enabled {
            Arc::new(NullStorage::new())
        } else {
            match (&config.file_path, config.stdout) {
                (Some(path), true) => Arc::new(DualStorage::new(path)?),
                (Some(path), false) => Arc::new(FileStorage::new(path)?),
                (None, true) => Arc::new(ConsoleStorage::new()),
                (None, false) => Arc::new(MemoryStorage::new()),
            }
        };

        Ok(Self { config, storage })
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(config: AuditConfig, storage: Arc<dyn AuditStorage>) -> Self {
        Self { config, storage }
    }

    /// An enabled logger keeping entries in memory.
    pub fn in_memory() -> Self {
        Self {
            config: AuditConfig::default(),
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self {
            config: AuditConfig {
                enabled: false,
                ..Default::default()
            },
            storage: Arc::new(NullStorage::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record an audit entry.
    pub async fn log(&self, entry: AuditEntry) -> Result<(), AuditError> {
        if !self.config.enabled {
            return Ok(());
        }

        tracing::debug!(
            entry_id = %entry.entry_id,
            status = %entry.status,
            principal = %entry.principal,
            action = %entry.action,
            "Audit entry"
        );

        self.storage.store(entry).await
    }

    /// Query audit entries with filters.
    pub async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        self.storage.query(filter).await
    }

    /// Count audit entries matching a filter (ignores limit/offset).
    pub async fn count(&self, filter: AuditFilter) -> Result<usize, AuditError> {
        self.storage.count(filter).await
    }

    pub async fn get(&self, entry_id: uuid::Uuid) -> Result<Option<AuditEntry>, AuditError> {
        self.storage.get(entry_id).await
    }

    /// Most recent entries for one principal, newest last.
    pub async fn recent_for_principal(
        &self,
        principal: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self
            .query(AuditFilter {
                principal: Some(principal.to_string()),
                ..Default::default()
            })
            .await?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}

#[async_trait]
impl AuditSink for AuditLogger {
    async fn insert(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.log(entry).await
    }
}

/// Filter for querying audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub principal: Option<String>,
    pub action: Option<String>,
    pub status: Option<AuditStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref principal) = self.principal {
            if &entry.principal != principal {
                return false;
            }
        }
        if let Some(ref action) = self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if entry.occurred_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if entry.occurred_at > end {
                return false;
            }
        }
        true
    }

    pub(crate) fn apply<'a>(&self, entries: impl Iterator<Item = &'a AuditEntry>) -> Vec<AuditEntry> {
        entries
            .filter(|e| self.matches(e))
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: AuditStatus, principal: &str) -> AuditEntry {
        AuditEntry::builder(status, principal, "SELECT 1").build()
    }

    #[tokio::test]
    async fn test_disabled_logger() {
        let logger = AuditLogger::disabled();
        assert!(!logger.is_enabled());

        logger.insert(entry(AuditStatus::Allowed, "analyst")).await.unwrap();
        assert_eq!(logger.count(AuditFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_in_memory_logger() {
        let logger = AuditLogger::in_memory();
        logger.insert(entry(AuditStatus::Allowed, "analyst")).await.unwrap();
        logger.insert(entry(AuditStatus::Denied, "analyst")).await.unwrap();
        logger.insert(entry(AuditStatus::Failed, "ops")).await.unwrap();

        let recent = logger.recent_for_principal("analyst", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, AuditStatus::Denied);
        assert_eq!(logger.count(AuditFilter::default()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_logger_from_config_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(AuditConfig {
            enabled: true,
            stdout: false,
            file_path: Some(path.clone()),
        })
        .unwrap();

        logger.insert(entry(AuditStatus::Allowed, "analyst")).await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert_eq!(logger.count(AuditFilter::default()).await.unwrap(), 1);
    }
}
