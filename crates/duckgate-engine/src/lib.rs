//! # duckgate-engine
//!
//! The secure engine composes the gateway's components into one `query`
//! operation:
//!
//! ```text
//! principal + SQL
//!   -> SqlAnalyzer      classify, collect tables and functions
//!   -> SqlRewriter      privilege checks, row filters, column masks
//!   -> ComputeResolver  local DuckDB or a remote agent
//!   -> AuditSink        one entry per attempt
//! ```
//!
//! Denials never reach compute. Remote failures are reported, never
//! retried locally.

pub mod engine;
pub mod state;

pub use engine::{QueryContext, QueryResult, SecureEngine};
pub use state::QueryState;

pub use duckgate_rewrite::{RewriteOutcome, StatementKind};
