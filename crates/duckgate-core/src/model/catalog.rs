//! Catalog introspection types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::securable::Securable;

/// Default schema for unqualified table references.
pub const DEFAULT_SCHEMA: &str = "main";

/// A possibly qualified table name as written in SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            table: table.into(),
        }
    }

    /// Build from identifier parts (`t`, `s.t` or `c.s.t`).
    pub fn from_parts(parts: &[String]) -> Option<Self> {
        match parts {
            [table] => Some(Self::new(table.clone())),
            [schema, table] => Some(Self {
                catalog: None,
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
            [catalog, schema, table] => Some(Self {
                catalog: Some(catalog.clone()),
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
            _ => None,
        }
    }

    /// Schema name, defaulting to [`DEFAULT_SCHEMA`].
    pub fn schema_or_default(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{}.", catalog)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        f.write_str(&self.table)
    }
}

/// A resolved table with the ids of its ancestors and its columns in
/// catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: Uuid,
    pub name: String,
    pub schema_id: Uuid,
    pub schema_name: String,
    pub catalog_id: Uuid,
    pub columns: Vec<String>,
}

impl TableInfo {
    pub fn securable(&self) -> Securable {
        Securable::Table {
            id: self.id,
            schema_id: self.schema_id,
            catalog_id: self.catalog_id,
        }
    }

    pub fn schema_securable(&self) -> Securable {
        Securable::Schema {
            id: self.schema_id,
            catalog_id: self.catalog_id,
        }
    }

    /// `schema.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_from_parts() {
        let name = TableName::from_parts(&["main".into(), "titanic".into()]).unwrap();
        assert_eq!(name.schema.as_deref(), Some("main"));
        assert_eq!(name.table, "titanic");
        assert_eq!(name.to_string(), "main.titanic");

        assert!(TableName::from_parts(&[]).is_none());
        assert_eq!(TableName::new("t").schema_or_default(), "main");
    }
}
