//! Authorization and policy injection for a single statement.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use duckgate_authz::{AuthorizationResolver, AuthzContext};
use duckgate_core::{
    CatalogRepository, GatewayError, Principal, Privilege, RbacStore, TableInfo, TableName,
};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{TableFactor, VisitMut, VisitorMut};
use tracing::debug;

use crate::analyzer::{AnalyzedStatement, BLOCKED_FUNCTIONS, SqlAnalyzer, StatementKind, object_name_parts};
use crate::error::RewriteError;
use crate::policy::{TablePolicy, render_filter, render_mask};

/// Result of rewriting one statement for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteOutcome {
    pub rewritten_sql: String,
    pub kind: StatementKind,
    /// Resolved `schema.table` names, or names as written for tables the
    /// catalog does not know.
    pub tables_accessed: Vec<String>,
    pub filters_applied: usize,
    /// Masked columns as `table.column`.
    pub masks_applied: Vec<String>,
}

/// A statement that passed authorization, with the policies to inject.
#[derive(Debug, Clone)]
pub struct AuthorizedStatement {
    pub analyzed: AnalyzedStatement,
    pub tables_accessed: Vec<String>,
    /// Policies keyed by the lowercased table reference as written.
    pub policies: BTreeMap<String, TablePolicy>,
}

/// Rewrites SQL so that it only returns what a principal may see.
#[derive(Clone)]
pub struct SqlRewriter {
    analyzer: SqlAnalyzer,
    resolver: AuthorizationResolver,
    store: Arc<dyn RbacStore>,
}

impl SqlRewriter {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self {
            analyzer: SqlAnalyzer::new(),
            resolver: AuthorizationResolver::new(store.clone()),
            store,
        }
    }

    pub fn analyzer(&self) -> &SqlAnalyzer {
        &self.analyzer
    }

    pub fn resolver(&self) -> &AuthorizationResolver {
        &self.resolver
    }

    /// Analyze, authorize and rewrite `sql` for `principal`.
    pub async fn rewrite(
        &self,
        principal: &Principal,
        sql: &str,
    ) -> Result<RewriteOutcome, RewriteError> {
        let analyzed = self.analyzer.analyze(sql)?;
        let authorized = self.authorize(principal, analyzed).await?;
        self.finish(principal, sql, authorized)
    }

    /// Inject the policies of an authorized statement. Statements without
    /// policies are returned exactly as submitted.
    pub fn finish(
        &self,
        principal: &Principal,
        sql: &str,
        authorized: AuthorizedStatement,
    ) -> Result<RewriteOutcome, RewriteError> {
        let rewritten_sql = if authorized.policies.is_empty() {
            sql.to_string()
        } else {
            self.apply(&authorized)?
        };

        let filters_applied = authorized.policies.values().map(|p| p.filters.len()).sum();
        let masks_applied = authorized
            .policies
            .values()
            .flat_map(|p| p.masked_columns())
            .collect();

        debug!(
            principal = %principal.name,
            kind = %authorized.analyzed.kind,
            filters = filters_applied,
            "statement rewritten"
        );

        Ok(RewriteOutcome {
            rewritten_sql,
            kind: authorized.analyzed.kind,
            tables_accessed: authorized.tables_accessed,
            filters_applied,
            masks_applied,
        })
    }

    /// Check every privilege the statement needs and collect the row filters
    /// and column masks to inject.
    pub async fn authorize(
        &self,
        principal: &Principal,
        analyzed: AnalyzedStatement,
    ) -> Result<AuthorizedStatement, RewriteError> {
        if analyzed.kind == StatementKind::Unsupported {
            return Err(RewriteError::UnsupportedStatement(leading_keyword(&analyzed)));
        }

        if principal.is_admin {
            let mut tables_accessed = Vec::new();
            for name in &analyzed.tables {
                let resolved = self.lookup(name).await?;
                push_unique(
                    &mut tables_accessed,
                    resolved.map(|t| t.qualified_name()).unwrap_or_else(|| name.to_string()),
                );
            }
            return Ok(AuthorizedStatement {
                analyzed,
                tables_accessed,
                policies: BTreeMap::new(),
            });
        }

        for function in analyzed.functions.iter().chain(&analyzed.table_functions) {
            if BLOCKED_FUNCTIONS.contains(&function.as_str()) {
                return Err(RewriteError::FunctionNotAllowed(function.clone()));
            }
        }
        if let Some(function) = analyzed.table_functions.iter().next() {
            return Err(RewriteError::TableFunctionNotAllowed(function.clone()));
        }

        let ctx = self.resolver.context(principal).await?;

        for cte in &analyzed.ctes {
            if self.lookup(&TableName::new(cte.clone())).await?.is_some() {
                return Err(RewriteError::CteShadowsTable(cte.clone()));
            }
        }

        if analyzed.kind == StatementKind::Ddl {
            let privilege = analyzed.ddl_privilege.unwrap_or(Privilege::AllPrivileges);
            let catalog = self
                .store
                .root_catalog()
                .await
                .map_err(GatewayError::from)?;
            if !self.resolver.has_privilege_in(&ctx, &catalog, privilege).await {
                return Err(RewriteError::AccessDenied {
                    privilege,
                    securable: "catalog".to_string(),
                });
            }
        }

        let mut tables_accessed = Vec::new();
        let mut policies = BTreeMap::new();
        for name in &analyzed.tables {
            let table = match self.lookup(name).await? {
                Some(table) => table,
                // DDL may name tables that do not exist yet.
                None if analyzed.kind == StatementKind::Ddl => {
                    push_unique(&mut tables_accessed, name.to_string());
                    continue;
                }
                None => return Err(RewriteError::TableNotFound(name.to_string())),
            };

            let table_privilege = match analyzed.kind {
                StatementKind::Write => Privilege::Modify,
                _ => Privilege::Select,
            };
            if analyzed.kind != StatementKind::Ddl
                && !self
                    .resolver
                    .has_privilege_in(&ctx, &table.schema_securable(), Privilege::Usage)
                    .await
            {
                return Err(RewriteError::AccessDenied {
                    privilege: Privilege::Usage,
                    securable: format!("schema {}", table.schema_name),
                });
            }
            if !self
                .resolver
                .has_privilege_in(&ctx, &table.securable(), table_privilege)
                .await
            {
                return Err(RewriteError::AccessDenied {
                    privilege: table_privilege,
                    securable: format!("table {}", table.qualified_name()),
                });
            }

            push_unique(&mut tables_accessed, table.qualified_name());

            if analyzed.kind == StatementKind::Select {
                let policy = self.policy_for(&ctx, table).await?;
                if !policy.is_empty() {
                    policies.insert(relation_key(&name_parts(name)), policy);
                }
            }
        }

        Ok(AuthorizedStatement {
            analyzed,
            tables_accessed,
            policies,
        })
    }

    /// Replace every policy-bearing table reference with a derived relation.
    pub fn apply(&self, authorized: &AuthorizedStatement) -> Result<String, RewriteError> {
        let mut statement = authorized.analyzed.statement.clone();
        let mut injector = PolicyInjector {
            rewriter: self,
            authorized,
        };
        if let ControlFlow::Break(err) = statement.visit(&mut injector) {
            return Err(err);
        }
        Ok(statement.to_string())
    }

    async fn lookup(&self, name: &TableName) -> Result<Option<TableInfo>, RewriteError> {
        self.store
            .lookup_table(name)
            .await
            .map_err(|e| RewriteError::Gateway(e.into()))
    }

    async fn policy_for(
        &self,
        ctx: &AuthzContext,
        table: TableInfo,
    ) -> Result<TablePolicy, RewriteError> {
        let dialect = self.analyzer.dialect();

        let filters = self
            .resolver
            .row_filters_in(ctx, table.id)
            .await?
            .iter()
            .map(|filter| render_filter(dialect, &filter.filter_sql))
            .collect::<Result<Vec<_>, _>>()?;

        let mut masks = BTreeMap::new();
        for (column, expr) in self.resolver.column_masks_in(ctx, table.id).await? {
            masks.insert(column, render_mask(dialect, &expr)?);
        }

        Ok(TablePolicy {
            table,
            filters,
            masks,
        })
    }
}

struct PolicyInjector<'a> {
    rewriter: &'a SqlRewriter,
    authorized: &'a AuthorizedStatement,
}

impl VisitorMut for PolicyInjector<'_> {
    type Break = RewriteError;

    fn post_visit_table_factor(&mut self, table_factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        let TableFactor::Table { name, args: None, .. } = &*table_factor else {
            return ControlFlow::Continue(());
        };

        let parts = object_name_parts(name);
        if parts.len() == 1 && self.authorized.analyzed.ctes.contains(&parts[0].to_lowercase()) {
            return ControlFlow::Continue(());
        }
        let Some(policy) = self.authorized.policies.get(&relation_key(&parts)) else {
            return ControlFlow::Continue(());
        };

        match policy.derived_relation(self.rewriter.analyzer.dialect(), &*table_factor) {
            Ok(derived) => {
                *table_factor = derived;
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }
}

fn name_parts(name: &TableName) -> Vec<String> {
    let mut parts = Vec::with_capacity(3);
    parts.extend(name.catalog.clone());
    parts.extend(name.schema.clone());
    parts.push(name.table.clone());
    parts
}

fn relation_key(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.to_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn leading_keyword(analyzed: &AnalyzedStatement) -> String {
    analyzed
        .statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_core::{Group, PrincipalType, Securable};
    use duckgate_store::MemoryStore;
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: Arc<MemoryStore>,
        rewriter: SqlRewriter,
        analyst: Principal,
        table: TableInfo,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new("memory"));
        let table = store
            .add_table("main", "titanic", &["PassengerId", "Name", "Pclass", "Survived"])
            .unwrap();
        let analyst = Principal::new("analyst");
        store.add_principal(analyst.clone()).unwrap();
        store
            .grant(
                PrincipalType::User,
                analyst.id,
                &table.schema_securable(),
                Privilege::Usage,
            )
            .unwrap();
        store
            .grant(PrincipalType::User, analyst.id, &table.securable(), Privilege::Select)
            .unwrap();
        let rewriter = SqlRewriter::new(store.clone());
        Fixture {
            store,
            rewriter,
            analyst,
            table,
        }
    }

    #[tokio::test]
    async fn test_no_policies_returns_original_sql() {
        let f = fixture();
        let sql = "SELECT * FROM titanic";
        let outcome = f.rewriter.rewrite(&f.analyst, sql).await.unwrap();
        assert_eq!(outcome.rewritten_sql, sql);
        assert_eq!(outcome.kind, StatementKind::Select);
        assert_eq!(outcome.tables_accessed, vec!["main.titanic"]);
        assert_eq!(outcome.filters_applied, 0);
    }

    #[tokio::test]
    async fn test_row_filters_are_anded() {
        let f = fixture();
        let first = f.store.add_row_filter(f.table.id, "a_first_class", "Pclass = 1").unwrap();
        let survivors = f.store.add_row_filter(f.table.id, "b_survivors", "Survived = 1").unwrap();
        f.store
            .bind_row_filter(first.id, PrincipalType::User, f.analyst.id)
            .unwrap();
        f.store
            .bind_row_filter(survivors.id, PrincipalType::User, f.analyst.id)
            .unwrap();

        let outcome = f
            .rewriter
            .rewrite(&f.analyst, "SELECT count(*) FROM titanic")
            .await
            .unwrap();
        assert!(
            outcome
                .rewritten_sql
                .contains("(Pclass = 1) AND (Survived = 1)"),
            "{}",
            outcome.rewritten_sql
        );
        assert_eq!(outcome.filters_applied, 2);
    }

    #[tokio::test]
    async fn test_column_mask_keeps_column_name() {
        let f = fixture();
        let mask = f.store.add_column_mask(f.table.id, "Name", "'***'").unwrap();
        f.store
            .bind_column_mask(mask.id, PrincipalType::User, f.analyst.id, false)
            .unwrap();

        let outcome = f
            .rewriter
            .rewrite(&f.analyst, "SELECT t.Name FROM titanic AS t")
            .await
            .unwrap();
        assert!(outcome.rewritten_sql.contains("'***' AS \"Name\""), "{}", outcome.rewritten_sql);
        assert!(outcome.rewritten_sql.contains("t.Name"), "{}", outcome.rewritten_sql);
        assert_eq!(outcome.masks_applied, vec!["titanic.Name"]);
    }

    #[tokio::test]
    async fn test_rewrite_is_deterministic() {
        let f = fixture();
        let filter = f.store.add_row_filter(f.table.id, "first", "Pclass = 1").unwrap();
        f.store
            .bind_row_filter(filter.id, PrincipalType::User, f.analyst.id)
            .unwrap();

        let sql = "SELECT Name FROM titanic WHERE Survived = 1 ORDER BY Name";
        let a = f.rewriter.rewrite(&f.analyst, sql).await.unwrap();
        let b = f.rewriter.rewrite(&f.analyst, sql).await.unwrap();
        assert_eq!(a.rewritten_sql, b.rewritten_sql);
    }

    #[tokio::test]
    async fn test_filter_applies_inside_subquery_and_cte() {
        let f = fixture();
        let filter = f.store.add_row_filter(f.table.id, "first", "Pclass = 1").unwrap();
        f.store
            .bind_row_filter(filter.id, PrincipalType::User, f.analyst.id)
            .unwrap();

        let outcome = f
            .rewriter
            .rewrite(
                &f.analyst,
                "WITH s AS (SELECT * FROM titanic) SELECT * FROM s WHERE Name IN (SELECT Name FROM titanic)",
            )
            .await
            .unwrap();
        assert_eq!(outcome.rewritten_sql.matches("(Pclass = 1)").count(), 2);
    }

    #[tokio::test]
    async fn test_missing_select_denied() {
        let f = fixture();
        let stranger = Principal::new("stranger");
        f.store.add_principal(stranger.clone()).unwrap();
        let err = f
            .rewriter
            .rewrite(&stranger, "SELECT * FROM titanic")
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::AccessDenied { privilege: Privilege::Usage, .. }));
    }

    #[tokio::test]
    async fn test_write_requires_modify() {
        let f = fixture();
        let err = f
            .rewriter
            .rewrite(&f.analyst, "DELETE FROM titanic")
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::AccessDenied { privilege: Privilege::Modify, .. }));

        f.store
            .grant(PrincipalType::User, f.analyst.id, &f.table.securable(), Privilege::Modify)
            .unwrap();
        let outcome = f
            .rewriter
            .rewrite(&f.analyst, "DELETE FROM titanic WHERE Pclass = 3")
            .await
            .unwrap();
        assert_eq!(outcome.kind, StatementKind::Write);
        assert_eq!(outcome.rewritten_sql, "DELETE FROM titanic WHERE Pclass = 3");
    }

    #[tokio::test]
    async fn test_ddl_requires_catalog_privilege() {
        let f = fixture();
        let err = f
            .rewriter
            .rewrite(&f.analyst, "DROP TABLE titanic")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RewriteError::AccessDenied { privilege: Privilege::AllPrivileges, .. }
        ));

        let catalog: Securable = f.store.catalog_securable().unwrap();
        f.store
            .grant(PrincipalType::User, f.analyst.id, &catalog, Privilege::CreateTable)
            .unwrap();
        let outcome = f
            .rewriter
            .rewrite(&f.analyst, "CREATE TABLE scratch (id INTEGER)")
            .await
            .unwrap();
        assert_eq!(outcome.kind, StatementKind::Ddl);
        assert_eq!(outcome.tables_accessed, vec!["scratch"]);
    }

    #[tokio::test]
    async fn test_blocked_function_rejected() {
        let f = fixture();
        let err = f
            .rewriter
            .rewrite(&f.analyst, "SELECT * FROM read_csv('/etc/passwd')")
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::FunctionNotAllowed(ref name) if name == "read_csv"));
        let gateway: GatewayError = err.into();
        assert_eq!(gateway.status_code(), 400);
    }

    #[tokio::test]
    async fn test_unknown_table_not_found() {
        let f = fixture();
        let err = f
            .rewriter
            .rewrite(&f.analyst, "SELECT * FROM passengers")
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_cte_shadowing_table_rejected() {
        let f = fixture();
        let err = f
            .rewriter
            .rewrite(&f.analyst, "WITH titanic AS (SELECT 1 AS x) SELECT * FROM titanic")
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::CteShadowsTable(_)));
    }

    #[tokio::test]
    async fn test_sampled_reference_keeps_filter() {
        let f = fixture();
        let filter = f.store.add_row_filter(f.table.id, "first_class", "Pclass = 1").unwrap();
        f.store
            .bind_row_filter(filter.id, PrincipalType::User, f.analyst.id)
            .unwrap();

        let outcome = f
            .rewriter
            .rewrite(&f.analyst, "SELECT count(*) FROM titanic TABLESAMPLE (10)")
            .await
            .unwrap();
        let sql = &outcome.rewritten_sql;
        assert!(sql.contains("TABLESAMPLE"), "{}", sql);
        assert!(sql.contains("WHERE (Pclass = 1)"), "{}", sql);
        assert_eq!(outcome.filters_applied, 1);
    }

    #[tokio::test]
    async fn test_admin_bypasses_policies() {
        let f = fixture();
        let filter = f.store.add_row_filter(f.table.id, "first", "Pclass = 1").unwrap();
        let admins = Group::new("admins");
        f.store.add_group(admins.clone()).unwrap();
        f.store
            .bind_row_filter(filter.id, PrincipalType::Group, admins.id)
            .unwrap();
        let root = Principal::admin("root");
        f.store.add_principal(root.clone()).unwrap();
        f.store
            .add_member(admins.id, PrincipalType::User, root.id)
            .unwrap();

        let sql = "SELECT * FROM read_parquet('x.parquet')";
        let outcome = f.rewriter.rewrite(&root, sql).await.unwrap();
        assert_eq!(outcome.rewritten_sql, sql);

        let outcome = f.rewriter.rewrite(&root, "SELECT * FROM titanic").await.unwrap();
        assert_eq!(outcome.rewritten_sql, "SELECT * FROM titanic");
    }

    #[tokio::test]
    async fn test_unsupported_rejected_for_admin() {
        let f = fixture();
        let root = Principal::admin("root");
        let err = f.rewriter.rewrite(&root, "SET threads = 4").await.unwrap_err();
        assert!(matches!(err, RewriteError::UnsupportedStatement(_)));
    }
}
