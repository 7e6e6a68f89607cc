//! Server side of the ComputeWorker RPC service.
//!
//! The agent trusts the gateway: it checks the shared token and executes
//! whatever SQL it receives, bounded by a concurrency limit, a timeout and
//! a result row limit. Running calls can be stopped by request id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use duckgate_core::AgentConfig;
use serde_json::Value;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::error::ComputeError;
use crate::local::LocalExecutor;
use crate::proto::compute_worker_server::{ComputeWorker, ComputeWorkerServer};
use crate::proto::{
    CancelRequest, CancelResponse, Cell, ExecuteRequest, ExecuteResponse, HealthRequest,
    HealthResponse, Row,
};
use crate::remote::AGENT_TOKEN_HEADER;
use crate::result::ExecutionResult;

type RunningMap = HashMap<String, CancellationToken>;

/// ComputeWorker implementation over a local DuckDB executor.
pub struct ComputeWorkerService {
    executor: LocalExecutor,
    auth_token: Option<String>,
    permits: Arc<Semaphore>,
    running: Arc<Mutex<RunningMap>>,
    max_result_rows: usize,
    query_timeout: Duration,
    started: Instant,
}

/// Registration of one running `Execute` call; unregisters on drop.
struct RunningQuery {
    running: Arc<Mutex<RunningMap>>,
    request_id: String,
    token: CancellationToken,
}

impl Drop for RunningQuery {
    fn drop(&mut self) {
        if !self.request_id.is_empty() {
            lock(&self.running).remove(&self.request_id);
        }
    }
}

// Entries are plain tokens, so a poisoned lock is recovered.
fn lock(running: &Mutex<RunningMap>) -> MutexGuard<'_, RunningMap> {
    running.lock().unwrap_or_else(|e| e.into_inner())
}

impl ComputeWorkerService {
    pub fn new(executor: LocalExecutor, config: &AgentConfig, auth_token: Option<String>) -> Self {
        Self {
            executor,
            auth_token,
            permits: Arc::new(Semaphore::new(config.max_concurrent_queries)),
            running: Arc::new(Mutex::new(HashMap::new())),
            max_result_rows: config.max_result_rows,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            started: Instant::now(),
        }
    }

    fn authenticate<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(expected) = &self.auth_token else {
            return Ok(());
        };
        let provided = request
            .metadata()
            .get(AGENT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            warn!("rejected request with invalid agent token");
            Err(Status::unauthenticated("invalid agent token"))
        }
    }

    /// Track a call so `Cancel` can reach it. Calls without a request id
    /// run untracked.
    fn register(&self, request_id: &str) -> Result<RunningQuery, Status> {
        let token = CancellationToken::new();
        if !request_id.is_empty() {
            let mut running = lock(&self.running);
            if running.contains_key(request_id) {
                return Err(Status::already_exists(format!(
                    "request '{}' is already running",
                    request_id
                )));
            }
            running.insert(request_id.to_string(), token.clone());
        }
        Ok(RunningQuery {
            running: self.running.clone(),
            request_id: request_id.to_string(),
            token,
        })
    }
}

fn to_status(err: ComputeError) -> Status {
    match err {
        ComputeError::ResultTooLarge(_) => Status::resource_exhausted(err.to_string()),
        ComputeError::Execution(msg) => Status::invalid_argument(msg),
        ComputeError::Timeout(_) => Status::deadline_exceeded(err.to_string()),
        ComputeError::Cancelled => Status::cancelled(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

fn encode_result(result: ExecutionResult, request_id: String) -> ExecuteResponse {
    let rows = result
        .rows
        .into_iter()
        .map(|values| Row {
            cells: values.into_iter().map(encode_cell).collect(),
        })
        .collect();
    ExecuteResponse {
        columns: result.columns,
        rows,
        row_count: result.row_count,
        request_id,
    }
}

fn encode_cell(value: Value) -> Cell {
    match value {
        Value::Null => Cell {
            is_null: true,
            text: String::new(),
        },
        Value::String(text) => Cell {
            is_null: false,
            text,
        },
        other => Cell {
            is_null: false,
            text: other.to_string(),
        },
    }
}

#[tonic::async_trait]
impl ComputeWorker for ComputeWorkerService {
    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        self.authenticate(&request)?;
        let ExecuteRequest { sql, request_id } = request.into_inner();
        if sql.trim().is_empty() {
            return Err(Status::invalid_argument("sql is required"));
        }

        let _permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| Status::resource_exhausted("too many concurrent queries"))?;

        let query = self.register(&request_id)?;

        debug!(request_id = %request_id, "executing remote query");
        let started = Instant::now();
        let run = tokio::time::timeout(
            self.query_timeout,
            self.executor.execute_limited(&sql, Some(self.max_result_rows)),
        );
        let result = tokio::select! {
            biased;
            _ = query.token.cancelled() => {
                info!(request_id = %request_id, "remote query cancelled");
                return Err(to_status(ComputeError::Cancelled));
            }
            res = run => res
                .map_err(|_| to_status(ComputeError::Timeout(self.query_timeout)))?
                .map_err(to_status)?,
        };

        info!(
            request_id = %request_id,
            rows = result.row_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "remote query executed"
        );
        Ok(Response::new(encode_result(result, request_id)))
    }

    async fn health(
        &self,
        request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        self.authenticate(&request)?;
        let version = self.executor.version().await.map_err(to_status)?;
        Ok(Response::new(HealthResponse {
            status: "ok".to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            duckdb_version: version,
        }))
    }

    async fn cancel(
        &self,
        request: Request<CancelRequest>,
    ) -> Result<Response<CancelResponse>, Status> {
        self.authenticate(&request)?;
        let CancelRequest { request_id } = request.into_inner();
        let token = lock(&self.running).get(&request_id).cloned();
        let cancelled = match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        debug!(request_id = %request_id, cancelled, "cancel requested");
        Ok(Response::new(CancelResponse { cancelled }))
    }
}

/// Serve the ComputeWorker service on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    service: ComputeWorkerService,
    shutdown: impl Future<Output = ()>,
) -> Result<(), tonic::transport::Error> {
    Server::builder()
        .add_service(ComputeWorkerServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}
