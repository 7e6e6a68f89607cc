//! # duckgate-store
//!
//! RBAC store backends implementing the read-only repository traits from
//! `duckgate-core`:
//!
//! - [`MemoryStore`]: an `RwLock`-guarded snapshot with single-write
//!   administrative helpers
//! - [`SqliteStore`]: a SQLite metastore via `sqlx`
//!
//! Both are populated from a name-based YAML [`RbacSeed`].

pub mod memory;
pub mod seed;
pub mod snapshot;
pub mod sqlite;

use std::sync::Arc;

use duckgate_core::{RbacBackend, RbacConfig, RbacStore};

pub use memory::MemoryStore;
pub use seed::RbacSeed;
pub use snapshot::{CatalogEntry, RbacSnapshot, SchemaEntry};
pub use sqlite::SqliteStore;

/// Open the configured store and load its seed.
pub async fn open_store(config: &RbacConfig) -> anyhow::Result<Arc<dyn RbacStore>> {
    let snapshot = match &config.seed_file {
        Some(path) => RbacSeed::from_file(path)?.resolve()?,
        None => {
            tracing::warn!("No RBAC seed configured; every non-admin query will be denied");
            RbacSnapshot::new("memory")
        }
    };

    match config.backend {
        RbacBackend::Memory => Ok(Arc::new(MemoryStore::from_snapshot(snapshot))),
        RbacBackend::Sqlite => {
            let store = SqliteStore::connect(config.database_url.as_deref()).await?;
            store.import(&snapshot).await?;
            Ok(Arc::new(store))
        }
    }
}
