//! Configuration types for duckgate.
//!
//! A gateway is configured from a single YAML file (`duckgate.yaml`):
//!
//! ```yaml
//! engine:
//!   init_sql: [sql/titanic.sql]
//! compute:
//!   remote_timeout_secs: 30
//!   result_cache:
//!     enabled: true
//! audit:
//!   file_path: logs/audit.jsonl
//! rbac:
//!   backend: memory
//!   seed_file: rbac.yaml
//! ```
//!
//! Relative paths are resolved against the directory of the config file by
//! [`GatewayConfig::load_with_context`].

pub mod agent;
pub mod audit;
pub mod compute;
pub mod engine;
pub mod rbac;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use agent::AgentConfig;
pub use audit::AuditConfig;
pub use compute::{ComputeConfig, ResultCacheConfig};
pub use engine::EngineConfig;
pub use rbac::{RbacBackend, RbacConfig};

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub compute: ComputeConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub rbac: RbacConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration and resolve relative paths against the config
    /// file's directory.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        config.engine.database_path = config
            .engine
            .database_path
            .map(|p| resolve_path(&base_dir, p));
        config.engine.init_sql = config
            .engine
            .init_sql
            .into_iter()
            .map(|p| resolve_path(&base_dir, p))
            .collect();
        config.audit.file_path = config.audit.file_path.map(|p| resolve_path(&base_dir, p));
        config.rbac.seed_file = config.rbac.seed_file.map(|p| resolve_path(&base_dir, p));

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.query_timeout_secs == 0 {
            return Err(ConfigError::Config(
                "engine.query_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.compute.remote_timeout_secs == 0 {
            return Err(ConfigError::Config(
                "compute.remote_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.compute.result_cache.enabled && self.compute.result_cache.max_entries == 0 {
            return Err(ConfigError::Config(
                "compute.result_cache.max_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.engine.query_timeout_secs, 120);
        assert_eq!(config.compute.remote_timeout_secs, 30);
        assert!(!config.compute.result_cache.enabled);
        assert!(config.compute.ping_before_dispatch);
        assert!(config.audit.enabled);
        assert_eq!(config.rbac.backend, RbacBackend::Memory);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
engine:
  init_sql: [sql/titanic.sql]
  query_timeout_secs: 10
compute:
  remote_timeout_secs: 3
  ping_before_dispatch: false
  result_cache:
    enabled: true
    ttl_secs: 5
    max_entries: 16
audit:
  stdout: true
rbac:
  backend: sqlite
  seed_file: rbac.yaml
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.engine.init_sql, vec![PathBuf::from("sql/titanic.sql")]);
        assert_eq!(config.compute.result_cache.max_entries, 16);
        assert!(!config.compute.ping_before_dispatch);
        assert!(config.audit.stdout);
        assert_eq!(config.rbac.backend, RbacBackend::Sqlite);
    }

    #[test]
    fn test_load_with_context_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duckgate.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "rbac:\n  seed_file: rbac.yaml\nengine:\n  init_sql: [init.sql]").unwrap();

        let config = GatewayConfig::load_with_context(&path).unwrap();
        assert_eq!(config.rbac.seed_file, Some(dir.path().join("rbac.yaml")));
        assert_eq!(config.engine.init_sql, vec![dir.path().join("init.sql")]);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = GatewayConfig::from_yaml("engine:\n  query_timeout_secs: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));
    }
}
