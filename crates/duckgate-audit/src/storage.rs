//! Audit storage backends.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use crate::entry::AuditEntry;
use crate::error::AuditError;
use crate::logger::AuditFilter;

/// Trait for audit storage backends.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Append an entry.
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError>;

    /// Query entries with filters, oldest first.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError>;

    /// Count entries matching a filter (ignores limit/offset).
    async fn count(&self, filter: AuditFilter) -> Result<usize, AuditError> {
        let filter = AuditFilter {
            limit: None,
            offset: None,
            ..filter
        };
        Ok(self.query(filter).await?.len())
    }

    /// Get an entry by ID.
    async fn get(&self, entry_id: Uuid) -> Result<Option<AuditEntry>, AuditError>;
}

// =============================================================================
// Memory
// =============================================================================

/// In-memory storage, queryable.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| AuditError::StorageError(format!("failed to acquire write lock: {}", e)))?;
        entries.push(entry);
        Ok(())
    }

    fn filtered(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::StorageError(format!("failed to acquire read lock: {}", e)))?;
        Ok(filter.apply(entries.iter()))
    }

    fn find(&self, entry_id: Uuid) -> Result<Option<AuditEntry>, AuditError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::StorageError(format!("failed to acquire read lock: {}", e)))?;
        Ok(entries.iter().find(|e| e.entry_id == entry_id).cloned())
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.push(entry)
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        self.filtered(&filter)
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<AuditEntry>, AuditError> {
        self.find(entry_id)
    }
}

// =============================================================================
// File
// =============================================================================

/// JSON Lines file storage. Entries written by this process are also kept
/// in memory for querying.
pub struct FileStorage {
    path: PathBuf,
    writer: Mutex<()>,
    cache: MemoryStorage,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Fail at startup rather than on the first query.
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AuditError::InitializationFailed(format!("{}: {}", path.display(), e))
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(()),
            cache: MemoryStorage::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let json = serde_json::to_string(&entry)?;
        {
            let _guard = self
                .writer
                .lock()
                .map_err(|e| AuditError::StorageError(format!("failed to acquire file lock: {}", e)))?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writeln!(file, "{}", json)?;
        }
        self.cache.push(entry)
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        self.cache.filtered(&filter)
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<AuditEntry>, AuditError> {
        self.cache.find(entry_id)
    }
}

// =============================================================================
// Console / Null / Dual
// =============================================================================

/// Human-readable lines on stdout. Not queryable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleStorage;

impl ConsoleStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        println!("{}", entry.to_log_line());
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(vec![])
    }

    async fn get(&self, _entry_id: Uuid) -> Result<Option<AuditEntry>, AuditError> {
        Ok(None)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(vec![])
    }

    async fn get(&self, _entry_id: Uuid) -> Result<Option<AuditEntry>, AuditError> {
        Ok(None)
    }
}

/// File plus console.
pub struct DualStorage {
    file: FileStorage,
    console: ConsoleStorage,
}

impl DualStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Ok(Self {
            file: FileStorage::new(path)?,
            console: ConsoleStorage::new(),
        })
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.console.store(entry.clone()).await?;
        self.file.store(entry).await
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        self.file.query(filter).await
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<AuditEntry>, AuditError> {
        self.file.get(entry_id).await
    }
}
