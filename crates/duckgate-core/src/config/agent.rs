//! Remote compute agent configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Configuration of a `duckgate-agent` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Shared secret expected in the `x-agent-token` header.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Environment variable holding the token, used when `auth_token` is unset.
    #[serde(default)]
    pub auth_token_env: Option<String>,

    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub init_sql: Vec<PathBuf>,

    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,

    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,

    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth_token: None,
            auth_token_env: None,
            database_path: None,
            init_sql: Vec::new(),
            max_result_rows: default_max_result_rows(),
            max_concurrent_queries: default_max_concurrent_queries(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// The configured token, reading `auth_token_env` when needed.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.auth_token {
            return Ok(token.clone());
        }
        if let Some(var) = &self.auth_token_env {
            return std::env::var(var).map_err(|_| {
                ConfigError::Config(format!("environment variable {} is not set", var))
            });
        }
        Err(ConfigError::Config(
            "agent requires auth_token or auth_token_env".to_string(),
        ))
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:50051".to_string()
}

fn default_max_result_rows() -> usize {
    10_000
}

fn default_max_concurrent_queries() -> usize {
    8
}

fn default_query_timeout_secs() -> u64 {
    120
}
