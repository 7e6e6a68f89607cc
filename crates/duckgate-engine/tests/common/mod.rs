//! Shared fixtures: a titanic table, an RBAC store and an in-process agent.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use duckgate_audit::{AuditEntry, AuditError, AuditLogger, AuditSink};
use duckgate_compute::{ComputeResolver, ComputeWorkerService, LocalExecutor, serve};
use duckgate_core::{
    AgentConfig, ComputeAssignment, ComputeConfig, ComputeEndpoint, Group, Principal,
    PrincipalType, Privilege, TableInfo,
};
use duckgate_engine::SecureEngine;
use duckgate_store::MemoryStore;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const TITANIC_SQL: &str = r#"
CREATE TABLE titanic AS
SELECT * FROM (VALUES
    (1, 0, 3, 'Braund, Mr. Owen Harris'),
    (2, 1, 1, 'Cumings, Mrs. John Bradley'),
    (3, 1, 3, 'Heikkinen, Miss. Laina'),
    (4, 1, 1, 'Futrelle, Mrs. Jacques Heath'),
    (5, 0, 3, 'Allen, Mr. William Henry'),
    (7, 0, 1, 'McCarthy, Mr. Timothy J')
) AS t("PassengerId", "Survived", "Pclass", "Name");
"#;

pub const AGENT_TOKEN: &str = "agent-secret";

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub titanic: TableInfo,
    pub analysts: Group,
    pub analyst: Principal,
    pub admin: Principal,
    pub outsider: Principal,
}

/// `analyst` belongs to `analysts`, which may read `main.titanic` through
/// the row filter `Pclass = 1` and sees `Name` masked as `'***'`.
pub fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new("memory"));
    let titanic = store
        .add_table("main", "titanic", &["PassengerId", "Survived", "Pclass", "Name"])
        .unwrap();

    let analyst = Principal::new("analyst");
    let admin = Principal::admin("admin");
    let outsider = Principal::new("outsider");
    for principal in [&analyst, &admin, &outsider] {
        store.add_principal(principal.clone()).unwrap();
    }

    let analysts = Group::new("analysts");
    store.add_group(analysts.clone()).unwrap();
    store
        .add_member(analysts.id, PrincipalType::User, analyst.id)
        .unwrap();
    store
        .grant(
            PrincipalType::Group,
            analysts.id,
            &titanic.schema_securable(),
            Privilege::Usage,
        )
        .unwrap();
    store
        .grant(
            PrincipalType::Group,
            analysts.id,
            &titanic.securable(),
            Privilege::Select,
        )
        .unwrap();

    let filter = store
        .add_row_filter(titanic.id, "first_class", "Pclass = 1")
        .unwrap();
    store
        .bind_row_filter(filter.id, PrincipalType::Group, analysts.id)
        .unwrap();
    let mask = store.add_column_mask(titanic.id, "Name", "'***'").unwrap();
    store
        .bind_column_mask(mask.id, PrincipalType::Group, analysts.id, false)
        .unwrap();

    Fixture {
        store,
        titanic,
        analysts,
        analyst,
        admin,
        outsider,
    }
}

pub fn local_executor() -> LocalExecutor {
    let executor = LocalExecutor::in_memory().unwrap();
    executor.execute_batch(TITANIC_SQL).unwrap();
    executor
}

pub fn engine(fixture: &Fixture, audit: Arc<dyn AuditSink>) -> SecureEngine {
    engine_with_config(fixture, audit, &ComputeConfig::default())
}

pub fn engine_with_config(
    fixture: &Fixture,
    audit: Arc<dyn AuditSink>,
    config: &ComputeConfig,
) -> SecureEngine {
    let compute = ComputeResolver::new(fixture.store.clone(), local_executor(), config);
    SecureEngine::new(fixture.store.clone(), compute, audit)
}

/// Engine plus the in-memory audit log it writes to.
pub fn audited(fixture: &Fixture) -> (SecureEngine, Arc<AuditLogger>) {
    let audit = Arc::new(AuditLogger::in_memory());
    (engine(fixture, audit.clone()), audit)
}

pub fn assign_group(fixture: &Fixture, endpoint: &str) {
    fixture
        .store
        .assign_compute(ComputeAssignment {
            endpoint_name: endpoint.to_string(),
            principal_id: fixture.analysts.id,
            principal_type: PrincipalType::Group,
            is_default: true,
        })
        .unwrap();
}

pub fn assign_user(fixture: &Fixture, endpoint: &str, user: &Principal) {
    fixture
        .store
        .assign_compute(ComputeAssignment {
            endpoint_name: endpoint.to_string(),
            principal_id: user.id,
            principal_type: PrincipalType::User,
            is_default: true,
        })
        .unwrap();
}

/// A running agent serving the titanic table; shut down when dropped.
pub struct TestAgent {
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestAgent {
    pub fn endpoint(&self, name: &str) -> ComputeEndpoint {
        ComputeEndpoint::remote(name, self.url.clone(), Some(AGENT_TOKEN.to_string()))
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_agent() -> TestAgent {
    let service = ComputeWorkerService::new(
        local_executor(),
        &AgentConfig::default(),
        Some(AGENT_TOKEN.to_string()),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        serve(listener, service, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    TestAgent {
        url: format!("grpc://{}", addr),
        shutdown: Some(tx),
    }
}

/// Sink whose every write fails.
pub struct FailingSink;

#[async_trait]
impl AuditSink for FailingSink {
    async fn insert(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Err(AuditError::StorageError("disk full".to_string()))
    }
}
