//! RBAC store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RbacBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Where principals, grants, filters, masks and compute assignments live.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RbacConfig {
    #[serde(default)]
    pub backend: RbacBackend,

    /// YAML seed loaded into the store at startup.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,

    /// SQLite URL, e.g. `sqlite://duckgate-meta.db`. Only used by the
    /// sqlite backend; defaults to an in-memory database.
    #[serde(default)]
    pub database_url: Option<String>,
}
