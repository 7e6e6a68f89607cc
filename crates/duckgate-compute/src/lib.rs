//! # duckgate-compute
//!
//! Where rewritten SQL actually runs.
//!
//! - [`LocalExecutor`] wraps an embedded DuckDB connection.
//! - [`RemoteClient`] dispatches SQL to a compute agent over the
//!   `ComputeWorker` gRPC service, optionally memoized by
//!   [`RemoteResultCache`].
//! - [`ComputeResolver`] picks the target for a principal from its compute
//!   assignments and runs the statement with timeout and cancellation.
//! - [`agent`] is the server side of the service, used by the
//!   `duckgate-agent` binary.
//!
//! Local results carry native JSON values. Remote results carry every
//! non-null value as a string, exactly as it travelled on the wire.

pub mod agent;
pub mod cache;
pub mod error;
pub mod local;
pub mod remote;
pub mod resolver;
pub mod result;

/// Generated `duckgate.compute.v1` messages and service stubs.
pub mod proto {
    tonic::include_proto!("duckgate.compute.v1");
}

pub use agent::{ComputeWorkerService, serve};
pub use cache::{CacheKey, RemoteResultCache};
pub use error::ComputeError;
pub use local::LocalExecutor;
pub use remote::{AGENT_TOKEN_HEADER, RemoteClient, dial_uri};
pub use resolver::{ComputeResolver, Execution};
pub use result::{ComputeTarget, ExecutionResult, HealthReport, HealthStatus, LOCAL_TARGET};
