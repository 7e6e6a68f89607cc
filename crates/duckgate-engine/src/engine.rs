//! The secure engine: one `query` call per request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use duckgate_audit::{AuditEntry, AuditEntryBuilder, AuditLogger, AuditSink, AuditStatus};
use duckgate_compute::{ComputeResolver, Execution, HealthReport, LocalExecutor};
use duckgate_core::{
    GatewayConfig, GatewayError, GatewayResult, Principal, PrincipalRepository, RbacStore,
};
use duckgate_rewrite::{RewriteOutcome, SqlRewriter, StatementKind};
use duckgate_store::open_store;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::QueryState;

/// Request-scoped context.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the request to a caller-owned cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Rows returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: u64,
    pub statement_kind: StatementKind,
    /// `local` or the remote endpoint name.
    pub compute: String,
    pub cached: bool,
    pub duration_ms: u64,
}

impl QueryResult {
    /// Value at (`row`, `column name`).
    pub fn value(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)
    }
}

/// Bookkeeping for one query attempt; becomes its audit entry.
struct QueryRun<'a> {
    principal: &'a str,
    sql: &'a str,
    state: QueryState,
    started: Instant,
    kind: Option<StatementKind>,
    rewritten_sql: Option<String>,
    tables: Vec<String>,
    compute: Option<String>,
}

impl<'a> QueryRun<'a> {
    fn new(principal: &'a str, sql: &'a str) -> Self {
        Self {
            principal,
            sql,
            state: QueryState::Received,
            started: Instant::now(),
            kind: None,
            rewritten_sql: None,
            tables: Vec::new(),
            compute: None,
        }
    }

    fn advance(&mut self, next: QueryState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!(principal = %self.principal, from = %self.state, to = %next, "query state");
        self.state = next;
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn audit_entry(&self, status: AuditStatus) -> AuditEntryBuilder {
        let mut builder = AuditEntry::builder(status, self.principal, self.sql)
            .tables(self.tables.clone())
            .duration_ms(self.elapsed_ms());
        if let Some(kind) = self.kind {
            builder = builder.statement_kind(kind.as_str());
        }
        if let Some(sql) = &self.rewritten_sql {
            builder = builder.rewritten_sql(sql.clone());
        }
        if let Some(compute) = &self.compute {
            builder = builder.compute(compute.clone());
        }
        builder
    }

    /// Terminal state for an error raised in the current state.
    fn terminal_for(&self, err: &GatewayError) -> QueryState {
        let before_execution = matches!(
            self.state,
            QueryState::Received | QueryState::Authorizing | QueryState::Rewriting
        );
        if before_execution && err.is_denial() {
            QueryState::Denied
        } else {
            QueryState::Failed
        }
    }
}

/// Composes authorization, rewriting, compute routing and auditing.
pub struct SecureEngine {
    store: Arc<dyn RbacStore>,
    rewriter: SqlRewriter,
    compute: ComputeResolver,
    audit: Arc<dyn AuditSink>,
}

impl SecureEngine {
    pub fn new(
        store: Arc<dyn RbacStore>,
        compute: ComputeResolver,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            rewriter: SqlRewriter::new(store.clone()),
            store,
            compute,
            audit,
        }
    }

    /// Open the store, the embedded database and the audit log described by
    /// `config`.
    pub async fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store = open_store(&config.rbac).await?;

        let local = LocalExecutor::open(config.engine.database_path.as_deref())?;
        local.run_init_files(&config.engine.init_sql)?;

        let compute = ComputeResolver::new(store.clone(), local, &config.compute)
            .with_local_timeout(Duration::from_secs(config.engine.query_timeout_secs));
        let audit = AuditLogger::new(config.audit.clone())?;

        info!(
            database = ?config.engine.database_path,
            rbac = ?config.rbac.backend,
            "secure engine ready"
        );
        Ok(Self::new(store, compute, Arc::new(audit)))
    }

    pub fn store(&self) -> &Arc<dyn RbacStore> {
        &self.store
    }

    pub fn rewriter(&self) -> &SqlRewriter {
        &self.rewriter
    }

    pub fn compute(&self) -> &ComputeResolver {
        &self.compute
    }

    async fn principal(&self, name: &str) -> GatewayResult<Principal> {
        self.store
            .principal_by_name(name)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("principal '{}' not found", name)))
    }

    /// Authorize, rewrite, execute and audit `sql` on behalf of
    /// `principal_name`. Exactly one audit entry is written per call.
    pub async fn query(
        &self,
        ctx: &QueryContext,
        principal_name: &str,
        sql: &str,
    ) -> GatewayResult<QueryResult> {
        let mut run = QueryRun::new(principal_name, sql);

        match self.run(ctx, &mut run).await {
            Ok(execution) => {
                run.advance(QueryState::Succeeded);
                let result = QueryResult {
                    columns: execution.result.columns,
                    rows: execution.result.rows,
                    row_count: execution.result.row_count,
                    statement_kind: execution.kind,
                    compute: execution.target.name().to_string(),
                    cached: execution.cached,
                    duration_ms: run.elapsed_ms(),
                };

                let entry = run
                    .audit_entry(AuditStatus::Allowed)
                    .row_count(result.row_count)
                    .build();
                if let Err(err) = self.audit.insert(entry).await {
                    error!(principal = %principal_name, error = %err, "audit write failed after execution");
                    return Err(GatewayError::internal(format!("audit write failed: {}", err)));
                }

                info!(
                    principal = %principal_name,
                    compute = %result.compute,
                    rows = result.row_count,
                    duration_ms = result.duration_ms,
                    "query succeeded"
                );
                Ok(result)
            }
            Err(err) => {
                let terminal = run.terminal_for(&err);
                run.advance(terminal);
                let status = match terminal {
                    QueryState::Denied => AuditStatus::Denied,
                    _ => AuditStatus::Failed,
                };

                match &err {
                    GatewayError::Internal(detail) => {
                        error!(principal = %principal_name, error = %detail, "query failed")
                    }
                    other if status == AuditStatus::Denied => {
                        info!(principal = %principal_name, error = %other, "query denied")
                    }
                    other => warn!(principal = %principal_name, error = %other, "query failed"),
                }

                let entry = run.audit_entry(status).error(err.to_string()).build();
                if let Err(audit_err) = self.audit.insert(entry).await {
                    error!(principal = %principal_name, error = %audit_err, "audit write failed");
                }
                Err(err)
            }
        }
    }

    async fn run(&self, ctx: &QueryContext, run: &mut QueryRun<'_>) -> GatewayResult<Execution> {
        let principal = self.principal(run.principal).await?;

        run.advance(QueryState::Authorizing);
        let analyzed = self.rewriter.analyzer().analyze(run.sql)?;
        run.kind = Some(analyzed.kind);
        let authorized = self.rewriter.authorize(&principal, analyzed).await?;
        run.tables = authorized.tables_accessed.clone();

        run.advance(QueryState::Rewriting);
        let RewriteOutcome {
            rewritten_sql,
            kind,
            ..
        } = self.rewriter.finish(&principal, run.sql, authorized)?;
        run.rewritten_sql = Some(rewritten_sql.clone());

        run.advance(QueryState::ResolvingCompute);
        let target = self.compute.resolve_target(&principal).await?;
        run.compute = Some(target.name().to_string());

        run.advance(QueryState::Executing);
        let execution = self
            .compute
            .execute_on(target, kind, &rewritten_sql, ctx.cancellation())
            .await?;
        Ok(execution)
    }

    /// Authorize and rewrite without executing. Nothing is audited.
    pub async fn explain(&self, principal_name: &str, sql: &str) -> GatewayResult<RewriteOutcome> {
        let principal = self.principal(principal_name).await?;
        Ok(self.rewriter.rewrite(&principal, sql).await?)
    }

    /// Check a compute endpoint by name.
    pub async fn health_check(&self, endpoint_name: &str) -> GatewayResult<HealthReport> {
        Ok(self.compute.health_check(endpoint_name).await?)
    }
}
