//! Building the engine from a configuration file.

mod common;

use common::TITANIC_SQL;
use duckgate_core::{GatewayConfig, GatewayError};
use duckgate_engine::{QueryContext, SecureEngine};
use serde_json::json;

const SEED: &str = r#"
schemas:
  - name: main
    tables:
      - name: titanic
        columns: [PassengerId, Survived, Pclass, Name]
principals:
  - name: alice
  - name: root
    is_admin: true
groups:
  - name: analysts
    members:
      - user: alice
grants:
  - group: analysts
    on: schema
    name: main
    privilege: USAGE
  - group: analysts
    on: table
    name: main.titanic
    privilege: SELECT
row_filters:
  - name: first_class
    table: main.titanic
    filter: "Pclass = 1"
    bindings:
      - group: analysts
column_masks:
  - table: main.titanic
    column: Name
    mask: "'***'"
    bindings:
      - group: analysts
        see_original: false
"#;

const CONFIG: &str = r#"
engine:
  init_sql: [init.sql]
rbac:
  backend: sqlite
  seed_file: seed.yaml
audit:
  file_path: audit.jsonl
"#;

#[tokio::test]
async fn test_engine_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("seed.yaml"), SEED).unwrap();
    std::fs::write(dir.path().join("init.sql"), TITANIC_SQL).unwrap();
    let config_path = dir.path().join("duckgate.yaml");
    std::fs::write(&config_path, CONFIG).unwrap();

    let config = GatewayConfig::load_with_context(&config_path).unwrap();
    let engine = SecureEngine::from_config(&config).await.unwrap();
    let ctx = QueryContext::new();

    let result = engine
        .query(&ctx, "alice", "SELECT Pclass, Name FROM titanic")
        .await
        .unwrap();
    assert_eq!(result.row_count, 3);
    assert!(result.rows.iter().all(|row| row == &vec![json!(1), json!("***")]));

    let all = engine
        .query(&ctx, "root", "SELECT count(*) AS n FROM titanic")
        .await
        .unwrap();
    assert_eq!(all.value(0, "n"), Some(&json!(6)));

    let err = engine
        .query(&ctx, "alice", "DROP TABLE titanic")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)), "{err}");

    let log = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["status"], "ALLOWED");
    assert_eq!(lines[2]["status"], "DENIED");
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = GatewayConfig::default();
    config.engine.query_timeout_secs = 0;
    assert!(SecureEngine::from_config(&config).await.is_err());
}
