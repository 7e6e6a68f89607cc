//! Audit logging configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for audit logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Also print entries to stdout.
    #[serde(default)]
    pub stdout: bool,

    /// JSON Lines file. Entries are kept in memory only when unset.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            stdout: false,
            file_path: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}
