//! # duckgate-audit
//!
//! Append-only audit trail for gateway queries.
//!
//! Every query attempt produces exactly one [`AuditEntry`]:
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `ALLOWED` | Authorized and executed |
//! | `DENIED` | Rejected before execution |
//! | `FAILED` | Authorized, but execution failed |
//!
//! Entries are written through the [`AuditSink`] trait, implemented by
//! [`AuditLogger`] over one of the storage backends (memory, JSON Lines
//! file, console, null, or file + console).
//!
//! ```rust,no_run
//! use duckgate_audit::{AuditEntry, AuditLogger, AuditSink, AuditStatus};
//! use duckgate_core::AuditConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let logger = AuditLogger::new(AuditConfig::default())?;
//! logger
//!     .insert(
//!         AuditEntry::builder(AuditStatus::Allowed, "analyst", "SELECT 1")
//!             .row_count(1)
//!             .build(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod error;
pub mod logger;
pub mod storage;

pub use entry::{ACTION_QUERY, AuditEntry, AuditEntryBuilder, AuditStatus};
pub use error::AuditError;
pub use logger::{AuditFilter, AuditLogger, AuditSink};
pub use storage::{
    AuditStorage, ConsoleStorage, DualStorage, FileStorage, MemoryStorage, NullStorage,
};
