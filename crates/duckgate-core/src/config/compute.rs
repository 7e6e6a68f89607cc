//! Compute routing configuration.

use serde::{Deserialize, Serialize};

/// Settings for dispatching to remote compute agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Per-request timeout for remote `Execute` calls.
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Timeout for `Health` calls.
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,

    /// Call the agent's `Health` RPC before each uncached dispatch.
    #[serde(default = "default_true")]
    pub ping_before_dispatch: bool,

    #[serde(default)]
    pub result_cache: ResultCacheConfig,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            remote_timeout_secs: default_remote_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
            ping_before_dispatch: true,
            result_cache: ResultCacheConfig::default(),
        }
    }
}

/// Remote result cache. Disabled unless configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCacheConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_max_entries() -> usize {
    1024
}
