//! `duckgate check`
//!
//! Loads the configuration and RBAC seed without opening any database and
//! reports what they contain.

use std::fmt;

use duckgate_compute::dial_uri;
use duckgate_core::{EndpointKind, GatewayConfig};
use duckgate_store::{RbacSeed, RbacSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

pub fn run(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("🔍 Checking duckgate configuration...");

    let mut findings = check_files(config);
    let snapshot = match &config.rbac.seed_file {
        Some(path) => match RbacSeed::from_file(path).and_then(|seed| seed.resolve()) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                findings.push(Finding::error(format!("{}: {}", path.display(), err)));
                None
            }
        },
        None => {
            findings.push(Finding::warning(
                "no rbac.seed_file configured; every non-admin query will be denied",
            ));
            None
        }
    };

    if let Some(snapshot) = &snapshot {
        findings.extend(check_endpoints(snapshot));
        println!();
        print!("{}", summary(snapshot));
    }

    println!();
    for finding in &findings {
        println!("  [{}] {}", finding.severity, finding.message);
    }

    if findings.iter().any(|f| f.severity == Severity::Error) {
        anyhow::bail!("configuration check failed");
    }
    println!("✅ Configuration is valid");
    Ok(())
}

fn check_files(config: &GatewayConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    for path in &config.engine.init_sql {
        if !path.is_file() {
            findings.push(Finding::error(format!(
                "init SQL file {} does not exist",
                path.display()
            )));
        }
    }
    if config.engine.database_path.is_none() {
        findings.push(Finding::warning(
            "engine.database_path is not set; using an in-memory database",
        ));
    }
    if config.audit.enabled && config.audit.file_path.is_none() && !config.audit.stdout {
        findings.push(Finding::warning(
            "audit entries are kept in memory only; set audit.file_path to persist them",
        ));
    }
    findings
}

fn check_endpoints(snapshot: &RbacSnapshot) -> Vec<Finding> {
    snapshot
        .endpoints
        .iter()
        .filter(|e| e.kind == EndpointKind::Remote)
        .filter_map(|e| {
            let mut problems = Vec::new();
            if let Err(err) = dial_uri(&e.url) {
                problems.push(Finding::error(format!("endpoint '{}': {}", e.name, err)));
            }
            if e.auth_token.is_none() {
                problems.push(Finding::warning(format!(
                    "endpoint '{}' has no auth token",
                    e.name
                )));
            }
            (!problems.is_empty()).then_some(problems)
        })
        .flatten()
        .collect()
}

fn summary(snapshot: &RbacSnapshot) -> String {
    let admins = snapshot.principals.iter().filter(|p| p.is_admin).count();
    format!(
        "  catalog:      {}\n  schemas:      {}\n  tables:       {}\n  principals:   {} ({} admin)\n  groups:       {}\n  grants:       {}\n  row filters:  {}\n  column masks: {}\n  endpoints:    {}\n  assignments:  {}\n",
        snapshot.catalog.name,
        snapshot.schemas.len(),
        snapshot.tables.len(),
        snapshot.principals.len(),
        admins,
        snapshot.groups.len(),
        snapshot.grants.len(),
        snapshot.row_filters.len(),
        snapshot.column_masks.len(),
        snapshot.endpoints.len(),
        snapshot.assignments.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_core::ComputeEndpoint;

    #[test]
    fn test_endpoint_findings() {
        let mut snapshot = RbacSnapshot::new("memory");
        snapshot
            .endpoints
            .push(ComputeEndpoint::remote("ok", "grpc://10.0.0.1:50051", Some("t".into())));
        snapshot
            .endpoints
            .push(ComputeEndpoint::remote("tls", "grpcs://10.0.0.1:443", Some("t".into())));
        snapshot
            .endpoints
            .push(ComputeEndpoint::remote("open", "grpc://10.0.0.2:50051", None));
        snapshot.endpoints.push(ComputeEndpoint::local("embedded"));

        let findings = check_endpoints(&snapshot);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Error);
        assert!(findings[0].message.contains("'tls'"));
        assert_eq!(findings[1].severity, Severity::Warning);
    }

    #[test]
    fn test_missing_init_file() {
        let mut config = GatewayConfig::default();
        config.engine.init_sql = vec!["/nonexistent/init.sql".into()];
        let findings = check_files(&config);
        assert!(findings.iter().any(|f| f.severity == Severity::Error));
    }

    #[test]
    fn test_summary_counts() {
        let snapshot = RbacSeed::from_yaml("principals:\n  - name: alice\n  - name: root\n    is_admin: true\n")
            .unwrap()
            .resolve()
            .unwrap();
        let text = summary(&snapshot);
        assert!(text.contains("principals:   2 (1 admin)"), "{}", text);
    }
}
