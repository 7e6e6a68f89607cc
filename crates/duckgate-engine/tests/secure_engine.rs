//! End-to-end behaviour of `SecureEngine::query`.

mod common;

use std::sync::Arc;

use common::{FailingSink, assign_group, assign_user, audited, engine, fixture, spawn_agent};
use duckgate_audit::{AuditFilter, AuditLogger, AuditStatus};
use duckgate_core::{ComputeEndpoint, GatewayError, PrincipalType, Privilege};
use duckgate_engine::QueryContext;
use duckgate_rewrite::StatementKind;
use pretty_assertions::assert_eq;
use serde_json::json;

async fn entries_for(audit: &AuditLogger, principal: &str) -> Vec<duckgate_audit::AuditEntry> {
    audit
        .query(AuditFilter {
            principal: Some(principal.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
}

// =============================================================================
// Row filters and column masks
// =============================================================================

#[tokio::test]
async fn test_filtered_and_masked_single_row() {
    let f = fixture();
    let (engine, audit) = audited(&f);

    let result = engine
        .query(&QueryContext::new(), "analyst", "SELECT * FROM titanic LIMIT 1")
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.value(0, "Name"), Some(&json!("***")));
    assert_eq!(result.value(0, "Pclass"), Some(&json!(1)));
    assert_eq!(result.statement_kind, StatementKind::Select);
    assert_eq!(result.compute, "local");

    let entries = entries_for(&audit, "analyst").await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.status, AuditStatus::Allowed);
    assert_eq!(entry.row_count, Some(1));
    assert_eq!(entry.tables, vec!["main.titanic"]);
    assert_eq!(entry.compute.as_deref(), Some("local"));
    assert!(
        entry
            .rewritten_sql
            .as_deref()
            .is_some_and(|sql| sql.contains("(Pclass = 1)")),
        "{:?}",
        entry.rewritten_sql
    );
}

#[tokio::test]
async fn test_aggregate_sees_only_filtered_group() {
    let f = fixture();
    let (engine, _audit) = audited(&f);

    let result = engine
        .query(
            &QueryContext::new(),
            "analyst",
            "SELECT Pclass, COUNT(*) AS n FROM titanic GROUP BY Pclass",
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.value(0, "Pclass"), Some(&json!(1)));
    assert_eq!(result.value(0, "n"), Some(&json!(3)));
}

#[tokio::test]
async fn test_filters_are_conjunctive() {
    let f = fixture();
    let survivors = f
        .store
        .add_row_filter(f.titanic.id, "survivors", "Survived = 1")
        .unwrap();
    f.store
        .bind_row_filter(survivors.id, PrincipalType::User, f.analyst.id)
        .unwrap();
    let (engine, _audit) = audited(&f);

    let result = engine
        .query(
            &QueryContext::new(),
            "analyst",
            "SELECT Pclass, Survived FROM titanic",
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 2);
    for row in &result.rows {
        assert_eq!(row, &vec![json!(1), json!(1)]);
    }
}

#[tokio::test]
async fn test_mask_applies_through_alias_and_star() {
    let f = fixture();
    let (engine, _audit) = audited(&f);
    let ctx = QueryContext::new();

    for sql in [
        "SELECT Name FROM titanic",
        "SELECT t.Name FROM titanic AS t",
        "SELECT * FROM titanic",
        "WITH firsts AS (SELECT * FROM titanic) SELECT Name FROM firsts",
    ] {
        let result = engine.query(&ctx, "analyst", sql).await.unwrap();
        assert!(result.row_count > 0, "{}", sql);
        for row in 0..result.rows.len() {
            assert_eq!(result.value(row, "Name"), Some(&json!("***")), "{}", sql);
        }
    }
}

#[tokio::test]
async fn test_see_original_needs_every_binding() {
    let f = fixture();
    let mask = f.store.add_column_mask(f.titanic.id, "Survived", "-1").unwrap();
    f.store
        .bind_column_mask(mask.id, PrincipalType::User, f.analyst.id, true)
        .unwrap();
    f.store
        .bind_column_mask(mask.id, PrincipalType::Group, f.analysts.id, false)
        .unwrap();
    let (engine, _audit) = audited(&f);

    let result = engine
        .query(&QueryContext::new(), "analyst", "SELECT Survived FROM titanic")
        .await
        .unwrap();
    assert!(result.rows.iter().all(|row| row[0] == json!(-1)));
}

#[tokio::test]
async fn test_admin_sees_everything() {
    let f = fixture();
    let (engine, audit) = audited(&f);

    let result = engine
        .query(
            &QueryContext::new(),
            "admin",
            "SELECT count(*) AS n, count(DISTINCT Pclass) AS classes FROM titanic",
        )
        .await
        .unwrap();
    assert_eq!(result.value(0, "n"), Some(&json!(6)));
    assert_eq!(result.value(0, "classes"), Some(&json!(2)));

    let names = engine
        .query(
            &QueryContext::new(),
            "admin",
            "SELECT Name FROM titanic WHERE PassengerId = 1",
        )
        .await
        .unwrap();
    assert_eq!(names.rows[0][0], json!("Braund, Mr. Owen Harris"));

    let entries = entries_for(&audit, "admin").await;
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.status == AuditStatus::Allowed));
}

#[tokio::test]
async fn test_rewrite_is_deterministic() {
    let f = fixture();
    let (engine, _audit) = audited(&f);
    let sql = "SELECT t.Name, Pclass FROM titanic t WHERE Survived = 1";

    let first = engine.explain("analyst", sql).await.unwrap();
    let second = engine.explain("analyst", sql).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.filters_applied, 1);
    assert_eq!(first.masks_applied, vec!["titanic.Name"]);
}

// =============================================================================
// Denials
// =============================================================================

#[tokio::test]
async fn test_deny_by_default() {
    let f = fixture();
    let (engine, audit) = audited(&f);

    let err = engine
        .query(&QueryContext::new(), "outsider", "SELECT * FROM titanic")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)), "{err}");
    assert_eq!(err.status_code(), 403);

    let entries = entries_for(&audit, "outsider").await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Denied);
    assert_eq!(entries[0].row_count, None);
    assert!(entries[0].error.is_some());
    assert!(entries[0].compute.is_none());
}

#[tokio::test]
async fn test_missing_schema_usage_denies() {
    let f = fixture();
    f.store
        .revoke(
            PrincipalType::Group,
            f.analysts.id,
            &f.titanic.schema_securable(),
            Privilege::Usage,
        )
        .unwrap();
    let (engine, _audit) = audited(&f);

    let err = engine
        .query(&QueryContext::new(), "analyst", "SELECT 1 FROM titanic")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)), "{err}");
}

#[tokio::test]
async fn test_write_without_modify_denied() {
    let f = fixture();
    let (engine, audit) = audited(&f);

    let err = engine
        .query(
            &QueryContext::new(),
            "analyst",
            "DELETE FROM titanic WHERE Pclass = 3",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)), "{err}");

    let entries = entries_for(&audit, "analyst").await;
    assert_eq!(entries[0].statement_kind.as_deref(), Some("WRITE"));

    let count = engine
        .query(&QueryContext::new(), "admin", "SELECT count(*) AS n FROM titanic")
        .await
        .unwrap();
    assert_eq!(count.value(0, "n"), Some(&json!(6)));
}

#[tokio::test]
async fn test_unknown_principal_is_not_found() {
    let f = fixture();
    let (engine, audit) = audited(&f);

    let err = engine
        .query(&QueryContext::new(), "mallory", "SELECT 1")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)), "{err}");

    let entries = entries_for(&audit, "mallory").await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Denied);
}

#[tokio::test]
async fn test_invalid_statements_are_validation_errors() {
    let f = fixture();
    let (engine, audit) = audited(&f);
    let ctx = QueryContext::new();

    for sql in [
        "SELECT 1; DROP TABLE titanic",
        "SELEC 1",
        "SELECT * FROM read_csv('/etc/passwd')",
    ] {
        let err = engine.query(&ctx, "analyst", sql).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)), "{sql}: {err}");
    }

    let entries = entries_for(&audit, "analyst").await;
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.status == AuditStatus::Denied));
}

#[tokio::test]
async fn test_table_less_select_allowed() {
    let f = fixture();
    let (engine, _audit) = audited(&f);

    let result = engine
        .query(&QueryContext::new(), "outsider", "SELECT 42 AS answer")
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!(42)]]);
}

// =============================================================================
// Failures and auditing
// =============================================================================

#[tokio::test]
async fn test_execution_error_is_failed() {
    let f = fixture();
    let (engine, audit) = audited(&f);

    let err = engine
        .query(
            &QueryContext::new(),
            "analyst",
            "SELECT no_such_column FROM titanic",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)), "{err}");

    let entries = entries_for(&audit, "analyst").await;
    assert_eq!(entries[0].status, AuditStatus::Failed);
    assert_eq!(entries[0].compute.as_deref(), Some("local"));
}

#[tokio::test]
async fn test_cancelled_request() {
    let f = fixture();
    let (engine, audit) = audited(&f);
    let ctx = QueryContext::new();
    ctx.cancel();

    let err = engine
        .query(&ctx, "analyst", "SELECT * FROM titanic")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled), "{err}");

    let entries = entries_for(&audit, "analyst").await;
    assert_eq!(entries[0].status, AuditStatus::Failed);
}

#[tokio::test]
async fn test_audit_failure_after_success_is_internal() {
    let f = fixture();
    let engine = engine(&f, Arc::new(FailingSink));

    let err = engine
        .query(&QueryContext::new(), "analyst", "SELECT * FROM titanic")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Internal(_)), "{err}");
    assert_eq!(err.public_message(), "internal error");
}

#[tokio::test]
async fn test_audit_failure_keeps_original_error() {
    let f = fixture();
    let engine = engine(&f, Arc::new(FailingSink));

    let err = engine
        .query(&QueryContext::new(), "outsider", "SELECT * FROM titanic")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)), "{err}");
}

// =============================================================================
// Compute routing
// =============================================================================

#[tokio::test]
async fn test_remote_values_are_text() {
    let f = fixture();
    let agent = spawn_agent().await;
    f.store.add_endpoint(agent.endpoint("agent-1")).unwrap();
    assign_user(&f, "agent-1", &f.admin);
    let (engine, _audit) = audited(&f);

    let remote = engine
        .query(&QueryContext::new(), "admin", "SELECT 42 AS answer")
        .await
        .unwrap();
    assert_eq!(remote.compute, "agent-1");
    assert_eq!(remote.rows, vec![vec![json!("42")]]);

    let local = engine
        .query(&QueryContext::new(), "outsider", "SELECT 42 AS answer")
        .await
        .unwrap();
    assert_eq!(local.compute, "local");
    assert_eq!(local.rows, vec![vec![json!(42)]]);
}

#[tokio::test]
async fn test_remote_receives_rewritten_sql() {
    let f = fixture();
    let agent = spawn_agent().await;
    f.store.add_endpoint(agent.endpoint("agent-1")).unwrap();
    assign_group(&f, "agent-1");
    let (engine, _audit) = audited(&f);

    let result = engine
        .query(&QueryContext::new(), "analyst", "SELECT Pclass, Name FROM titanic")
        .await
        .unwrap();
    assert_eq!(result.compute, "agent-1");
    assert_eq!(result.row_count, 3);
    for row in &result.rows {
        assert_eq!(row, &vec![json!("1"), json!("***")]);
    }
}

#[tokio::test]
async fn test_unassign_falls_back_to_local() {
    let f = fixture();
    let agent = spawn_agent().await;
    f.store.add_endpoint(agent.endpoint("agent-1")).unwrap();
    assign_group(&f, "agent-1");
    let (engine, _audit) = audited(&f);
    let sql = "SELECT count(*) AS n FROM titanic";

    let remote = engine.query(&QueryContext::new(), "analyst", sql).await.unwrap();
    assert_eq!(remote.compute, "agent-1");

    assert!(
        f.store
            .unassign_compute("agent-1", PrincipalType::Group, f.analysts.id)
            .unwrap()
    );
    let local = engine.query(&QueryContext::new(), "analyst", sql).await.unwrap();
    assert_eq!(local.compute, "local");
    assert_eq!(local.value(0, "n"), Some(&json!(3)));
}

#[tokio::test]
async fn test_unreachable_remote_is_not_downgraded() {
    let f = fixture();
    f.store
        .add_endpoint(ComputeEndpoint::remote(
            "agent-1",
            "grpc://127.0.0.1:1",
            Some("token".to_string()),
        ))
        .unwrap();
    assign_group(&f, "agent-1");
    let (engine, audit) = audited(&f);

    let err = engine
        .query(&QueryContext::new(), "analyst", "SELECT * FROM titanic")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RemoteUnavailable(_)), "{err}");
    assert_eq!(err.status_code(), 502);

    let entries = entries_for(&audit, "analyst").await;
    assert_eq!(entries[0].status, AuditStatus::Failed);
    assert_eq!(entries[0].compute.as_deref(), Some("agent-1"));

    let health = engine.health_check("agent-1").await.unwrap();
    assert!(!health.is_healthy());
}

#[tokio::test]
async fn test_health_of_running_agent() {
    let f = fixture();
    let agent = spawn_agent().await;
    f.store.add_endpoint(agent.endpoint("agent-1")).unwrap();
    let (engine, _audit) = audited(&f);

    assert!(engine.health_check("agent-1").await.unwrap().is_healthy());
    assert!(engine.health_check("local").await.unwrap().is_healthy());
    let err = engine.health_check("nope").await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)), "{err}");
}
