//! Compute resolution: which backend runs a principal's query.
//!
//! Resolution order:
//!
//! 1. the principal's own default assignment
//! 2. the default assignment of each group in the transitive closure,
//!    ascending by group name
//! 3. local execution
//!
//! Assignments to `INACTIVE` endpoints are skipped. An assignment to a
//! missing endpoint is an error. Remote failures are never retried locally.
//!
//! Only `Select` results are cached. Any other statement on a remote
//! endpoint drops that endpoint's cached results.

use std::sync::Arc;
use std::time::Duration;

use duckgate_authz::AuthorizationResolver;
use duckgate_core::{
    ComputeAssignment, ComputeConfig, ComputeEndpoint, ComputeRepository, EndpointKind,
    Principal, PrincipalType, RbacStore, StatementKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, RemoteResultCache};
use crate::error::ComputeError;
use crate::local::LocalExecutor;
use crate::remote::{RemoteClient, dial_uri};
use crate::result::{ComputeTarget, ExecutionResult, HealthReport, LOCAL_TARGET};

/// An execution together with the target that produced it.
#[derive(Debug, Clone)]
pub struct Execution {
    pub target: ComputeTarget,
    pub kind: StatementKind,
    pub result: ExecutionResult,
    pub cached: bool,
}

/// Why an execution was abandoned before it finished.
enum Abandoned {
    Cancelled,
    TimedOut,
}

/// Routes rewritten SQL to local or remote compute.
pub struct ComputeResolver {
    store: Arc<dyn RbacStore>,
    authz: AuthorizationResolver,
    local: LocalExecutor,
    remote: Arc<RemoteClient>,
    cache: Option<RemoteResultCache>,
    local_timeout: Duration,
    remote_timeout: Duration,
    health_timeout: Duration,
    ping_before_dispatch: bool,
}

impl ComputeResolver {
    pub fn new(store: Arc<dyn RbacStore>, local: LocalExecutor, config: &ComputeConfig) -> Self {
        Self {
            authz: AuthorizationResolver::new(store.clone()),
            store,
            local,
            remote: Arc::new(RemoteClient::new(config)),
            cache: RemoteResultCache::from_config(&config.result_cache),
            local_timeout: Duration::from_secs(120),
            remote_timeout: Duration::from_secs(config.remote_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
            ping_before_dispatch: config.ping_before_dispatch,
        }
    }

    /// Upper bound on local statements.
    pub fn with_local_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeout = timeout;
        self
    }

    pub fn local(&self) -> &LocalExecutor {
        &self.local
    }

    pub fn cache(&self) -> Option<&RemoteResultCache> {
        self.cache.as_ref()
    }

    /// Forget cached channels and results of one endpoint.
    pub fn invalidate_endpoint(&self, endpoint_name: &str) {
        self.remote.evict(endpoint_name);
        if let Some(cache) = &self.cache {
            let removed = cache.invalidate_endpoint(endpoint_name);
            debug!(endpoint = %endpoint_name, removed, "invalidated remote results");
        }
    }

    /// Pick the compute target for `principal`.
    pub async fn resolve_target(&self, principal: &Principal) -> Result<ComputeTarget, ComputeError> {
        let direct = self
            .store
            .default_assignment(PrincipalType::User, principal.id)
            .await?;
        if let Some(target) = self.target_of(direct).await? {
            return Ok(target);
        }

        for group in self.authz.group_closure(principal).await? {
            let assignment = self
                .store
                .default_assignment(PrincipalType::Group, group.id)
                .await?;
            if let Some(target) = self.target_of(assignment).await? {
                debug!(principal = %principal.name, group = %group.name, compute = %target, "compute inherited from group");
                return Ok(target);
            }
        }

        Ok(ComputeTarget::Local)
    }

    /// `None` when there is no assignment or its endpoint is inactive.
    async fn target_of(
        &self,
        assignment: Option<ComputeAssignment>,
    ) -> Result<Option<ComputeTarget>, ComputeError> {
        let Some(assignment) = assignment else {
            return Ok(None);
        };
        let endpoint = self
            .store
            .endpoint_by_name(&assignment.endpoint_name)
            .await?
            .ok_or_else(|| ComputeError::EndpointNotFound(assignment.endpoint_name.clone()))?;

        if !endpoint.is_active() {
            debug!(endpoint = %endpoint.name, "skipping inactive endpoint");
            return Ok(None);
        }
        Ok(Some(match endpoint.kind {
            EndpointKind::Local => ComputeTarget::Local,
            EndpointKind::Remote => ComputeTarget::Remote(endpoint),
        }))
    }

    /// Resolve the target for `principal` and run `sql` on it.
    pub async fn execute(
        &self,
        principal: &Principal,
        kind: StatementKind,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Execution, ComputeError> {
        let target = self.resolve_target(principal).await?;
        self.execute_on(target, kind, sql, cancel).await
    }

    /// Run `sql` on a known target, bounded by the target's timeout and the
    /// caller's cancellation. An abandoned remote call is also cancelled on
    /// the agent.
    pub async fn execute_on(
        &self,
        target: ComputeTarget,
        kind: StatementKind,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Execution, ComputeError> {
        let timeout = match &target {
            ComputeTarget::Local => self.local_timeout,
            ComputeTarget::Remote(_) => self.remote_timeout,
        };
        let request_id = Uuid::new_v4().to_string();

        let run = async {
            match &target {
                ComputeTarget::Local => self.local.execute(sql).await.map(|r| (r, false)),
                ComputeTarget::Remote(endpoint) => {
                    self.execute_remote(endpoint, kind, sql, &request_id).await
                }
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Abandoned::Cancelled),
            res = tokio::time::timeout(timeout, run) => res.map_err(|_| Abandoned::TimedOut),
        };

        if let ComputeTarget::Remote(endpoint) = &target {
            if !kind.is_read_only() {
                self.invalidate_results(&endpoint.name);
            }
        }

        let (result, cached) = match outcome {
            Ok(inner) => inner?,
            Err(abandoned) => {
                if let ComputeTarget::Remote(endpoint) = &target {
                    self.cancel_remote(endpoint, &request_id);
                }
                return Err(match (abandoned, &target) {
                    (Abandoned::Cancelled, _) => ComputeError::Cancelled,
                    (Abandoned::TimedOut, ComputeTarget::Local) => ComputeError::Timeout(timeout),
                    (Abandoned::TimedOut, ComputeTarget::Remote(endpoint)) => {
                        ComputeError::RemoteUnavailable {
                            endpoint: endpoint.name.clone(),
                            reason: format!("timed out after {:?}", timeout),
                        }
                    }
                });
            }
        };

        info!(compute = %target, kind = %kind, rows = result.row_count, cached, "query executed");
        Ok(Execution {
            target,
            kind,
            result,
            cached,
        })
    }

    async fn execute_remote(
        &self,
        endpoint: &ComputeEndpoint,
        kind: StatementKind,
        sql: &str,
        request_id: &str,
    ) -> Result<(ExecutionResult, bool), ComputeError> {
        let cache = self.cache.as_ref().filter(|_| kind.is_read_only());
        let lookup = cache.map(|cache| {
            (
                cache,
                CacheKey::new(endpoint, sql),
                cache.generation(&endpoint.name),
            )
        });
        if let Some((cache, key, _)) = &lookup {
            if let Some(hit) = cache.get(key) {
                debug!(endpoint = %endpoint.name, "remote result cache hit");
                return Ok((hit, true));
            }
        }

        if self.ping_before_dispatch {
            self.ping(endpoint).await?;
        }
        let result = self.remote.execute(endpoint, sql, request_id).await?;

        if let Some((cache, key, generation)) = lookup {
            if !cache.insert_if_current(key, result.clone(), generation) {
                debug!(endpoint = %endpoint.name, "discarded result fetched before invalidation");
            }
        }
        Ok((result, false))
    }

    async fn ping(&self, endpoint: &ComputeEndpoint) -> Result<(), ComputeError> {
        match tokio::time::timeout(self.health_timeout, self.remote.ping(endpoint)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(endpoint = %endpoint.name, error = %err, "remote agent unhealthy");
                Err(err)
            }
            Err(_) => Err(ComputeError::RemoteUnavailable {
                endpoint: endpoint.name.clone(),
                reason: format!("health check got no response within {:?}", self.health_timeout),
            }),
        }
    }

    /// Ask the agent to stop an abandoned call without holding up the
    /// caller. Best effort: the agent also stops work when the call drops.
    fn cancel_remote(&self, endpoint: &ComputeEndpoint, request_id: &str) {
        let remote = self.remote.clone();
        let endpoint = endpoint.clone();
        let request_id = request_id.to_string();
        let timeout = self.health_timeout;
        tokio::spawn(async move {
            let cancel = remote.cancel(&endpoint, &request_id);
            match tokio::time::timeout(timeout, cancel).await {
                Ok(Ok(found)) => debug!(
                    endpoint = %endpoint.name,
                    request_id = %request_id,
                    found,
                    "remote cancel sent"
                ),
                Ok(Err(err)) => warn!(
                    endpoint = %endpoint.name,
                    request_id = %request_id,
                    error = %err,
                    "remote cancel failed"
                ),
                Err(_) => warn!(
                    endpoint = %endpoint.name,
                    request_id = %request_id,
                    "remote cancel timed out"
                ),
            }
        });
    }

    /// Drop cached results of one endpoint, keeping its channel.
    fn invalidate_results(&self, endpoint_name: &str) {
        if let Some(cache) = &self.cache {
            let removed = cache.invalidate_endpoint(endpoint_name);
            debug!(endpoint = %endpoint_name, removed, "write invalidated remote results");
        }
    }

    /// Check one endpoint. Local endpoints are always healthy; the name
    /// `local` refers to in-process execution when no endpoint uses it.
    pub async fn health_check(&self, endpoint_name: &str) -> Result<HealthReport, ComputeError> {
        let endpoint = match self.store.endpoint_by_name(endpoint_name).await? {
            Some(endpoint) => endpoint,
            None if endpoint_name == LOCAL_TARGET => return self.local_health(endpoint_name).await,
            None => return Err(ComputeError::EndpointNotFound(endpoint_name.to_string())),
        };

        if endpoint.kind == EndpointKind::Local {
            return self.local_health(&endpoint.name).await;
        }
        dial_uri(&endpoint.url)?;

        let reply = tokio::time::timeout(self.health_timeout, self.remote.health(&endpoint)).await;
        let report = match reply {
            Ok(Ok(health)) => HealthReport {
                duckdb_version: Some(health.duckdb_version).filter(|v| !v.is_empty()),
                uptime_seconds: Some(health.uptime_seconds),
                ..HealthReport::healthy(&endpoint.name)
            },
            Ok(Err(err)) => HealthReport::unreachable(&endpoint.name, err.to_string()),
            Err(_) => HealthReport::unreachable(
                &endpoint.name,
                format!("no response within {:?}", self.health_timeout),
            ),
        };

        if !report.is_healthy() {
            warn!(endpoint = %endpoint.name, error = ?report.error, "endpoint unhealthy");
        }
        Ok(report)
    }

    async fn local_health(&self, name: &str) -> Result<HealthReport, ComputeError> {
        let version = self.local.version().await.ok();
        Ok(HealthReport {
            duckdb_version: version,
            ..HealthReport::healthy(name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_core::{EndpointStatus, Group, ResultCacheConfig};
    use duckgate_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        resolver: ComputeResolver,
        user: Principal,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new("memory"));
        let user = Principal::new("analyst");
        store.add_principal(user.clone()).unwrap();
        let resolver = ComputeResolver::new(
            store.clone(),
            LocalExecutor::in_memory().unwrap(),
            &ComputeConfig::default(),
        );
        Fixture {
            store,
            resolver,
            user,
        }
    }

    fn assign(store: &MemoryStore, endpoint: &str, principal_type: PrincipalType, id: Uuid) {
        store
            .assign_compute(ComputeAssignment {
                endpoint_name: endpoint.to_string(),
                principal_id: id,
                principal_type,
                is_default: true,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_unassigned_runs_locally() {
        let f = fixture();
        let target = f.resolver.resolve_target(&f.user).await.unwrap();
        assert_eq!(target, ComputeTarget::Local);
    }

    #[tokio::test]
    async fn test_direct_assignment_wins() {
        let f = fixture();
        f.store
            .add_endpoint(ComputeEndpoint::remote("direct", "grpc://127.0.0.1:1", None))
            .unwrap();
        f.store
            .add_endpoint(ComputeEndpoint::remote("shared", "grpc://127.0.0.1:2", None))
            .unwrap();
        let group = Group::new("analysts");
        f.store.add_group(group.clone()).unwrap();
        f.store
            .add_member(group.id, PrincipalType::User, f.user.id)
            .unwrap();
        assign(&f.store, "shared", PrincipalType::Group, group.id);
        assign(&f.store, "direct", PrincipalType::User, f.user.id);

        let target = f.resolver.resolve_target(&f.user).await.unwrap();
        assert_eq!(target.name(), "direct");
    }

    #[tokio::test]
    async fn test_group_order_is_by_name() {
        let f = fixture();
        for name in ["zeta-ep", "alpha-ep"] {
            f.store
                .add_endpoint(ComputeEndpoint::remote(name, "grpc://127.0.0.1:1", None))
                .unwrap();
        }
        let zeta = Group::new("zeta");
        let alpha = Group::new("alpha");
        for group in [&zeta, &alpha] {
            f.store.add_group(group.clone()).unwrap();
            f.store
                .add_member(group.id, PrincipalType::User, f.user.id)
                .unwrap();
        }
        assign(&f.store, "zeta-ep", PrincipalType::Group, zeta.id);
        assign(&f.store, "alpha-ep", PrincipalType::Group, alpha.id);

        let target = f.resolver.resolve_target(&f.user).await.unwrap();
        assert_eq!(target.name(), "alpha-ep");
    }

    #[tokio::test]
    async fn test_inactive_endpoint_skipped() {
        let f = fixture();
        f.store
            .add_endpoint(ComputeEndpoint::remote("gpu", "grpc://127.0.0.1:1", None))
            .unwrap();
        assign(&f.store, "gpu", PrincipalType::User, f.user.id);
        f.store
            .set_endpoint_status("gpu", EndpointStatus::Inactive)
            .unwrap();

        let target = f.resolver.resolve_target(&f.user).await.unwrap();
        assert_eq!(target, ComputeTarget::Local);
    }

    #[tokio::test]
    async fn test_local_endpoint_kind() {
        let f = fixture();
        f.store.add_endpoint(ComputeEndpoint::local("embedded")).unwrap();
        assign(&f.store, "embedded", PrincipalType::User, f.user.id);
        let target = f.resolver.resolve_target(&f.user).await.unwrap();
        assert_eq!(target, ComputeTarget::Local);
    }

    #[tokio::test]
    async fn test_unreachable_remote_does_not_fall_back() {
        let f = fixture();
        f.store
            .add_endpoint(ComputeEndpoint::remote("gpu", "grpc://127.0.0.1:1", None))
            .unwrap();
        assign(&f.store, "gpu", PrincipalType::User, f.user.id);

        let err = f
            .resolver
            .execute(
                &f.user,
                StatementKind::Select,
                "SELECT 42 AS answer",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::RemoteUnavailable { .. }), "{err}");

        let report = f.resolver.health_check("gpu").await.unwrap();
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn test_unassign_falls_back_to_local() {
        let f = fixture();
        f.store
            .add_endpoint(ComputeEndpoint::remote("gpu", "grpc://127.0.0.1:1", None))
            .unwrap();
        assign(&f.store, "gpu", PrincipalType::User, f.user.id);
        assert!(f.store.unassign_compute("gpu", PrincipalType::User, f.user.id).unwrap());

        let execution = f
            .resolver
            .execute(
                &f.user,
                StatementKind::Select,
                "SELECT 42 AS answer",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(execution.target, ComputeTarget::Local);
        assert_eq!(execution.result.rows[0][0], serde_json::json!(42));
    }

    #[tokio::test]
    async fn test_cancelled_before_execution() {
        let f = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let err = f
            .resolver
            .execute_on(ComputeTarget::Local, StatementKind::Select, "SELECT 1", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::Cancelled));
    }

    #[tokio::test]
    async fn test_health_local_and_unknown() {
        let f = fixture();
        assert!(f.resolver.health_check("local").await.unwrap().is_healthy());
        let err = f.resolver.health_check("nope").await.unwrap_err();
        assert!(matches!(err, ComputeError::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn test_tls_endpoint_rejected() {
        let f = fixture();
        f.store
            .add_endpoint(ComputeEndpoint::remote("secure", "grpcs://agent:443", None))
            .unwrap();
        let err = f.resolver.health_check("secure").await.unwrap_err();
        assert!(matches!(err, ComputeError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn test_cache_enabled_from_config() {
        let store = Arc::new(MemoryStore::new("memory"));
        let config = ComputeConfig {
            result_cache: ResultCacheConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let resolver = ComputeResolver::new(store, LocalExecutor::in_memory().unwrap(), &config);
        assert!(resolver.cache().is_some());
    }
}
