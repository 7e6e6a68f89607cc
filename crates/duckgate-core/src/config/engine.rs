//! Local engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of the embedded DuckDB instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Database file. `None` opens an in-memory database.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// SQL files executed once at startup, in order.
    #[serde(default)]
    pub init_sql: Vec<PathBuf>,

    /// Upper bound on a single query, local or remote.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            init_sql: Vec::new(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_query_timeout_secs() -> u64 {
    120
}
