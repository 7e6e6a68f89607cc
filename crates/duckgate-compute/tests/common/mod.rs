//! In-process compute agent for integration tests.

use std::sync::Arc;

use duckgate_compute::{ComputeResolver, ComputeWorkerService, LocalExecutor, serve};
use duckgate_core::{
    AgentConfig, ComputeAssignment, ComputeConfig, ComputeEndpoint, Principal, PrincipalType,
};
use duckgate_store::MemoryStore;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const AGENT_TOKEN: &str = "agent-secret";

/// A running agent; shut down when dropped.
pub struct TestAgent {
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
    _handle: JoinHandle<()>,
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_agent(seed_sql: &str) -> TestAgent {
    spawn_agent_with(seed_sql, AgentConfig::default()).await
}

pub async fn spawn_agent_with(seed_sql: &str, config: AgentConfig) -> TestAgent {
    let executor = LocalExecutor::in_memory().unwrap();
    if !seed_sql.is_empty() {
        executor.execute_batch(seed_sql).unwrap();
    }
    let service = ComputeWorkerService::new(executor, &config, Some(AGENT_TOKEN.to_string()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        serve(listener, service, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    TestAgent {
        url: format!("grpc://{}", addr),
        shutdown: Some(tx),
        _handle: handle,
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub resolver: ComputeResolver,
    pub user: Principal,
}

/// A store with one user assigned to `endpoint`.
pub fn fixture(endpoint: ComputeEndpoint, config: &ComputeConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new("memory"));
    let user = Principal::new("analyst");
    store.add_principal(user.clone()).unwrap();
    let name = endpoint.name.clone();
    store.add_endpoint(endpoint).unwrap();
    store
        .assign_compute(ComputeAssignment {
            endpoint_name: name,
            principal_id: user.id,
            principal_type: PrincipalType::User,
            is_default: true,
        })
        .unwrap();

    let resolver = ComputeResolver::new(store.clone(), LocalExecutor::in_memory().unwrap(), config);
    Fixture {
        store,
        resolver,
        user,
    }
}
