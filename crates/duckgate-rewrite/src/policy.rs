//! Rendering of row filters and column masks into derived relations.

use std::collections::BTreeMap;

use duckgate_core::TableInfo;
use sqlparser::ast::{ObjectName, SelectItem, SetExpr, Statement, TableAlias, TableFactor};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::error::RewriteError;

/// Effective row filters and column masks for one table reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePolicy {
    pub table: TableInfo,
    /// Validated filter expressions in application order.
    pub filters: Vec<String>,
    /// Validated mask expressions keyed by column name.
    pub masks: BTreeMap<String, String>,
}

impl TablePolicy {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.masks.is_empty()
    }

    /// Masked columns as `table.column`.
    pub fn masked_columns(&self) -> Vec<String> {
        self.table
            .columns
            .iter()
            .filter(|column| self.mask_for(column).is_some())
            .map(|column| format!("{}.{}", self.table.name, column))
            .collect()
    }

    fn mask_for(&self, column: &str) -> Option<&String> {
        self.masks
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, expr)| expr)
    }

    /// The subquery that replaces a reference to this table.
    pub fn inner_sql(&self, name: &ObjectName) -> String {
        let projection = if self.masks.is_empty() {
            "*".to_string()
        } else {
            self.table
                .columns
                .iter()
                .map(|column| match self.mask_for(column) {
                    Some(expr) => format!("{} AS {}", expr, quote_ident(column)),
                    None => quote_ident(column),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", projection, name);
        if !self.filters.is_empty() {
            let predicate = self
                .filters
                .iter()
                .map(|f| format!("({})", f))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        sql
    }

    /// A derived table factor standing in for a reference to this table,
    /// keeping the alias the query used or the bare table name so outer
    /// column references resolve.
    ///
    /// `TABLESAMPLE` and time travel clauses move onto the base table inside
    /// the subquery, so sampling happens before the row filters. Hints and
    /// partition selection have no counterpart there and are rejected.
    pub fn derived_relation(
        &self,
        dialect: &dyn Dialect,
        reference: &TableFactor,
    ) -> Result<TableFactor, RewriteError> {
        let TableFactor::Table {
            name,
            alias,
            sample,
            version,
            with_hints,
            partitions,
            ..
        } = reference
        else {
            return Err(RewriteError::InvalidPolicy {
                expression: reference.to_string(),
                reason: "not a table reference".to_string(),
            });
        };
        let unsupported = |clause: &str| RewriteError::UnsupportedTableClause {
            clause: clause.to_string(),
            table: name.to_string(),
        };
        if !with_hints.is_empty() {
            return Err(unsupported("WITH table hints"));
        }
        if !partitions.is_empty() {
            return Err(unsupported("PARTITION selection"));
        }

        let alias = match alias {
            Some(alias) => render_alias(alias),
            None => match name.0.last() {
                Some(part) => part.to_string(),
                None => quote_ident(&self.table.name),
            },
        };
        let wrapper = format!("SELECT * FROM ({}) AS {}", self.inner_sql(name), alias);

        let invalid = |reason: &str| RewriteError::InvalidPolicy {
            expression: wrapper.clone(),
            reason: reason.to_string(),
        };

        let mut statements = Parser::parse_sql(dialect, &wrapper).map_err(|e| invalid(&e.to_string()))?;
        let Some(Statement::Query(query)) = statements.pop() else {
            return Err(invalid("not a query"));
        };
        let SetExpr::Select(select) = *query.body else {
            return Err(invalid("not a select"));
        };
        let mut relation = select
            .from
            .into_iter()
            .next()
            .map(|from| from.relation)
            .ok_or_else(|| invalid("missing relation"))?;

        if sample.is_some() || version.is_some() {
            let base = match &mut relation {
                TableFactor::Derived { subquery, .. } => match subquery.body.as_mut() {
                    SetExpr::Select(inner) => inner.from.first_mut().map(|from| &mut from.relation),
                    _ => None,
                },
                _ => None,
            };
            let Some(TableFactor::Table {
                sample: inner_sample,
                version: inner_version,
                ..
            }) = base
            else {
                return Err(invalid("missing base table"));
            };
            inner_sample.clone_from(sample);
            inner_version.clone_from(version);
        }
        Ok(relation)
    }
}

fn render_alias(alias: &TableAlias) -> String {
    if alias.columns.is_empty() {
        return alias.name.to_string();
    }
    let columns = alias
        .columns
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} ({})", alias.name, columns)
}

/// Validate a row filter predicate and return its canonical rendering.
pub fn render_filter(dialect: &dyn Dialect, filter_sql: &str) -> Result<String, RewriteError> {
    render_expression(dialect, filter_sql)
}

/// Validate a column mask expression and return its canonical rendering.
pub fn render_mask(dialect: &dyn Dialect, mask_sql: &str) -> Result<String, RewriteError> {
    let rendered = render_expression(dialect, mask_sql)?;
    // A mask must be usable as a single projection item.
    let wrapped = format!("SELECT {}", rendered);
    let statements = Parser::parse_sql(dialect, &wrapped).map_err(|e| RewriteError::InvalidPolicy {
        expression: mask_sql.to_string(),
        reason: e.to_string(),
    })?;
    let single_item = match statements.as_slice() {
        [Statement::Query(query)] => match query.body.as_select() {
            Some(select) => matches!(select.projection.as_slice(), [SelectItem::UnnamedExpr(_)]),
            None => false,
        },
        _ => false,
    };
    if !single_item {
        return Err(RewriteError::InvalidPolicy {
            expression: mask_sql.to_string(),
            reason: "mask must be a single expression".to_string(),
        });
    }
    Ok(rendered)
}

fn render_expression(dialect: &dyn Dialect, sql: &str) -> Result<String, RewriteError> {
    let invalid = |reason: String| RewriteError::InvalidPolicy {
        expression: sql.to_string(),
        reason,
    };

    let mut parser = Parser::new(dialect)
        .try_with_sql(sql)
        .map_err(|e| invalid(e.to_string()))?;
    let expr = parser.parse_expr().map_err(|e| invalid(e.to_string()))?;
    if parser.peek_token().token != Token::EOF {
        return Err(invalid("trailing input after expression".to_string()));
    }
    Ok(expr.to_string())
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
