//! SQL parsing, classification and reference extraction.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

pub use duckgate_core::StatementKind;
use duckgate_core::{Privilege, TableName};
use sqlparser::ast::{Expr, ObjectName, ObjectNamePart, Query, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::error::RewriteError;

/// Engine functions that read the filesystem or expose engine metadata.
/// Non-admin principals may not call them, as scalar or table functions.
pub const BLOCKED_FUNCTIONS: &[&str] = &[
    "read_csv",
    "read_csv_auto",
    "read_parquet",
    "read_json",
    "read_json_auto",
    "read_text",
    "read_blob",
    "glob",
    "sqlite_scan",
    "query_table",
    "duckdb_extensions",
    "duckdb_settings",
    "duckdb_databases",
    "duckdb_secrets",
    "pragma_database_list",
];

/// A parsed single statement and everything it references.
#[derive(Debug, Clone)]
pub struct AnalyzedStatement {
    pub statement: Statement,
    pub kind: StatementKind,
    /// Catalog privilege a DDL statement requires.
    pub ddl_privilege: Option<Privilege>,
    /// Base tables in first-seen order, CTE references excluded.
    pub tables: Vec<TableName>,
    /// CTE names, lowercased.
    pub ctes: BTreeSet<String>,
    /// Scalar and aggregate function names, lowercased.
    pub functions: BTreeSet<String>,
    /// Table function names, lowercased.
    pub table_functions: BTreeSet<String>,
}

/// Parses and analyzes SQL with the DuckDB dialect.
#[derive(Debug, Default)]
pub struct SqlAnalyzer {
    dialect: DuckDbDialect,
}

// `DuckDbDialect` is a unit struct that does not implement `Clone`.
impl Clone for SqlAnalyzer {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl SqlAnalyzer {
    pub fn new() -> Self {
        Self {
            dialect: DuckDbDialect {},
        }
    }

    pub fn dialect(&self) -> &DuckDbDialect {
        &self.dialect
    }

    /// Parse a SQL string into statements.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, RewriteError> {
        Parser::parse_sql(&self.dialect, sql).map_err(|e| RewriteError::ParseError(e.to_string()))
    }

    /// Parse exactly one statement and extract its references.
    pub fn analyze(&self, sql: &str) -> Result<AnalyzedStatement, RewriteError> {
        let mut statements = self.parse(sql)?;
        let statement = match statements.len() {
            0 => return Err(RewriteError::EmptyStatement),
            1 => statements.remove(0),
            _ => return Err(RewriteError::MultipleStatements),
        };

        let mut collector = ReferenceCollector::default();
        // The collector never breaks.
        let _ = statement.visit(&mut collector);

        let mut kind = classify(&statement);
        if kind == StatementKind::Select {
            if let Some(nested) = collector.nested_kind {
                kind = nested.max(kind);
            }
        }

        let ddl_privilege = (kind == StatementKind::Ddl).then(|| ddl_privilege(&statement));
        let ctes = collector.ctes;
        let tables = collector
            .tables
            .into_iter()
            .filter(|t| !is_cte_reference(t, &ctes))
            .collect();

        Ok(AnalyzedStatement {
            statement,
            kind,
            ddl_privilege,
            tables,
            ctes,
            functions: collector.functions,
            table_functions: collector.table_functions,
        })
    }
}

/// Top-level classification of a statement.
pub fn classify(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Query(query) => {
            let select_into = query
                .body
                .as_select()
                .map(|select| select.into.is_some())
                .unwrap_or(false);
            if select_into {
                StatementKind::Ddl
            } else {
                StatementKind::Select
            }
        }
        Statement::Insert { .. }
        | Statement::Update { .. }
        | Statement::Delete { .. }
        | Statement::Merge { .. } => StatementKind::Write,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateSequence { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::Drop { .. }
        | Statement::Truncate { .. } => StatementKind::Ddl,
        _ => StatementKind::Unsupported,
    }
}

fn ddl_privilege(statement: &Statement) -> Privilege {
    match statement {
        Statement::CreateSchema { .. } => Privilege::CreateSchema,
        Statement::Query(_)
        | Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateSequence { .. } => Privilege::CreateTable,
        _ => Privilege::AllPrivileges,
    }
}

/// Unquoted identifier parts of an object name.
pub fn object_name_parts(name: &ObjectName) -> Vec<String> {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            #[allow(unreachable_patterns)]
            other => other.to_string(),
        })
        .collect()
}

/// Lowercased last part of an object name.
pub fn base_name(name: &ObjectName) -> String {
    object_name_parts(name)
        .pop()
        .unwrap_or_default()
        .to_lowercase()
}

fn is_cte_reference(table: &TableName, ctes: &BTreeSet<String>) -> bool {
    table.catalog.is_none() && table.schema.is_none() && ctes.contains(&table.table.to_lowercase())
}

#[derive(Default)]
struct ReferenceCollector {
    tables: Vec<TableName>,
    ctes: BTreeSet<String>,
    functions: BTreeSet<String>,
    table_functions: BTreeSet<String>,
    /// The next relation is a table function name.
    skip_relation: bool,
    depth: usize,
    nested_kind: Option<StatementKind>,
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<()> {
        if self.depth > 0 {
            let kind = classify(statement);
            self.nested_kind = Some(self.nested_kind.map_or(kind, |k| k.max(kind)));
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_statement(&mut self, _statement: &Statement) -> ControlFlow<()> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<()> {
        match table_factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => {
                self.table_functions.insert(base_name(name));
                self.skip_relation = true;
            }
            TableFactor::Function { name, .. } => {
                self.table_functions.insert(base_name(name));
            }
            TableFactor::TableFunction { expr, .. } => {
                let name = match expr {
                    Expr::Function(func) => base_name(&func.name),
                    other => other.to_string().to_lowercase(),
                };
                self.table_functions.insert(name);
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        if std::mem::take(&mut self.skip_relation) {
            return ControlFlow::Continue(());
        }
        if let Some(name) = TableName::from_parts(&object_name_parts(relation)) {
            if !self.tables.contains(&name) {
                self.tables.push(name);
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if let Expr::Function(func) = expr {
            self.functions.insert(base_name(&func.name));
        }
        ControlFlow::Continue(())
    }
}
