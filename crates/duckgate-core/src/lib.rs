//! # duckgate-core
//!
//! Shared building blocks for the duckgate query gateway:
//!
//! - the domain model (principals, groups, grants, row filters, column
//!   masks, compute endpoints and catalog entries)
//! - the [`GatewayError`] taxonomy every operation returns
//! - the read-only repository traits the gateway consumes
//! - YAML configuration for the gateway and the compute agent

pub mod config;
pub mod error;
pub mod model;
pub mod repository;

pub use config::{
    AgentConfig, AuditConfig, ComputeConfig, ConfigError, EngineConfig, GatewayConfig,
    LoggingConfig, RbacBackend, RbacConfig, ResultCacheConfig,
};
pub use error::{GatewayError, StoreError};
pub use model::*;
pub use repository::{
    CatalogRepository, ColumnMaskRepository, ComputeRepository, GrantRepository,
    GroupRepository, PrincipalRepository, RbacStore, RowFilterRepository, StoreResult,
};

/// Result type used across the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;
