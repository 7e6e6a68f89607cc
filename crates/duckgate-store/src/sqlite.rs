//! SQLite-backed RBAC store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckgate_core::{
    BoundColumnMask, CatalogRepository, ColumnMask, ColumnMaskRepository, ComputeAssignment,
    ComputeEndpoint, ComputeRepository, EndpointKind, EndpointStatus, GrantRepository, Group,
    GroupRepository, Principal, PrincipalKind, PrincipalRepository, PrincipalType, Privilege,
    RowFilter, RowFilterRepository, Securable, SecurableType, StoreError, StoreResult, TableInfo, TableName,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::snapshot::RbacSnapshot;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS catalogs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS schemas (
    id TEXT PRIMARY KEY,
    catalog_id TEXT NOT NULL REFERENCES catalogs(id),
    name TEXT NOT NULL COLLATE NOCASE,
    UNIQUE (catalog_id, name)
);
CREATE TABLE IF NOT EXISTS tables (
    id TEXT PRIMARY KEY,
    schema_id TEXT NOT NULL REFERENCES schemas(id),
    name TEXT NOT NULL COLLATE NOCASE,
    columns TEXT NOT NULL,
    UNIQUE (schema_id, name)
);
CREATE TABLE IF NOT EXISTS principals (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS principal_groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES principal_groups(id),
    member_type TEXT NOT NULL,
    member_id TEXT NOT NULL,
    PRIMARY KEY (group_id, member_type, member_id)
);
CREATE TABLE IF NOT EXISTS privilege_grants (
    principal_id TEXT NOT NULL,
    principal_type TEXT NOT NULL,
    securable_type TEXT NOT NULL,
    securable_id TEXT NOT NULL,
    privilege TEXT NOT NULL,
    PRIMARY KEY (principal_id, principal_type, securable_type, securable_id, privilege)
);
CREATE TABLE IF NOT EXISTS row_filters (
    id TEXT PRIMARY KEY,
    table_id TEXT NOT NULL REFERENCES tables(id),
    name TEXT NOT NULL,
    filter_sql TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS row_filter_bindings (
    row_filter_id TEXT NOT NULL REFERENCES row_filters(id),
    principal_id TEXT NOT NULL,
    principal_type TEXT NOT NULL,
    PRIMARY KEY (row_filter_id, principal_id, principal_type)
);
CREATE TABLE IF NOT EXISTS column_masks (
    id TEXT PRIMARY KEY,
    table_id TEXT NOT NULL REFERENCES tables(id),
    column_name TEXT NOT NULL,
    mask_expression TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS column_mask_bindings (
    column_mask_id TEXT NOT NULL REFERENCES column_masks(id),
    principal_id TEXT NOT NULL,
    principal_type TEXT NOT NULL,
    see_original INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (column_mask_id, principal_id, principal_type)
);
CREATE TABLE IF NOT EXISTS compute_endpoints (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    url TEXT NOT NULL DEFAULT '',
    auth_token TEXT,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS compute_assignments (
    endpoint_name TEXT NOT NULL REFERENCES compute_endpoints(name),
    principal_id TEXT NOT NULL,
    principal_type TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (endpoint_name, principal_id, principal_type)
);
"#;

/// RBAC store backed by a SQLite metastore.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema if needed. `None` opens a private
    /// in-memory database.
    pub async fn connect(database_url: Option<&str>) -> anyhow::Result<Self> {
        let url = database_url.unwrap_or("sqlite::memory:");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to `:memory:` is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Replace the whole store content with `snapshot` in one transaction.
    pub async fn import(&self, snapshot: &RbacSnapshot) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for table in [
            "compute_assignments",
            "compute_endpoints",
            "column_mask_bindings",
            "column_masks",
            "row_filter_bindings",
            "row_filters",
            "privilege_grants",
            "group_members",
            "principal_groups",
            "principals",
            "tables",
            "schemas",
            "catalogs",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        sqlx::query("INSERT INTO catalogs (id, name) VALUES (?, ?)")
            .bind(snapshot.catalog.id.to_string())
            .bind(&snapshot.catalog.name)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for s in &snapshot.schemas {
            sqlx::query("INSERT INTO schemas (id, catalog_id, name) VALUES (?, ?, ?)")
                .bind(s.id.to_string())
                .bind(s.catalog_id.to_string())
                .bind(&s.name)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for t in &snapshot.tables {
            let columns = serde_json::to_string(&t.columns)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            sqlx::query("INSERT INTO tables (id, schema_id, name, columns) VALUES (?, ?, ?, ?)")
                .bind(t.id.to_string())
                .bind(t.schema_id.to_string())
                .bind(&t.name)
                .bind(columns)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for p in &snapshot.principals {
            sqlx::query("INSERT INTO principals (id, name, kind, is_admin) VALUES (?, ?, ?, ?)")
                .bind(p.id.to_string())
                .bind(&p.name)
                .bind(kind_str(p.kind))
                .bind(p.is_admin)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for g in &snapshot.groups {
            sqlx::query("INSERT INTO principal_groups (id, name) VALUES (?, ?)")
                .bind(g.id.to_string())
                .bind(&g.name)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for m in &snapshot.members {
            sqlx::query(
                "INSERT INTO group_members (group_id, member_type, member_id) VALUES (?, ?, ?)",
            )
            .bind(m.group_id.to_string())
            .bind(m.member_type.as_str())
            .bind(m.member_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for g in &snapshot.grants {
            sqlx::query(
                "INSERT INTO privilege_grants \
                 (principal_id, principal_type, securable_type, securable_id, privilege) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(g.principal_id.to_string())
            .bind(g.principal_type.as_str())
            .bind(g.securable_type.as_str())
            .bind(g.securable_id.to_string())
            .bind(g.privilege.as_str())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for f in &snapshot.row_filters {
            sqlx::query("INSERT INTO row_filters (id, table_id, name, filter_sql) VALUES (?, ?, ?, ?)")
                .bind(f.id.to_string())
                .bind(f.table_id.to_string())
                .bind(&f.name)
                .bind(&f.filter_sql)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for b in &snapshot.row_filter_bindings {
            sqlx::query(
                "INSERT INTO row_filter_bindings (row_filter_id, principal_id, principal_type) \
                 VALUES (?, ?, ?)",
            )
            .bind(b.row_filter_id.to_string())
            .bind(b.principal_id.to_string())
            .bind(b.principal_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for m in &snapshot.column_masks {
            sqlx::query(
                "INSERT INTO column_masks (id, table_id, column_name, mask_expression) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(m.id.to_string())
            .bind(m.table_id.to_string())
            .bind(&m.column_name)
            .bind(&m.mask_expression)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for b in &snapshot.column_mask_bindings {
            sqlx::query(
                "INSERT INTO column_mask_bindings \
                 (column_mask_id, principal_id, principal_type, see_original) VALUES (?, ?, ?, ?)",
            )
            .bind(b.column_mask_id.to_string())
            .bind(b.principal_id.to_string())
            .bind(b.principal_type.as_str())
            .bind(b.see_original)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for e in &snapshot.endpoints {
            sqlx::query(
                "INSERT INTO compute_endpoints (id, name, kind, status, url, auth_token, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(e.id.to_string())
            .bind(&e.name)
            .bind(e.kind.to_string())
            .bind(e.status.to_string())
            .bind(&e.url)
            .bind(e.auth_token.as_deref())
            .bind(e.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for a in &snapshot.assignments {
            sqlx::query(
                "INSERT INTO compute_assignments \
                 (endpoint_name, principal_id, principal_type, is_default) VALUES (?, ?, ?, ?)",
            )
            .bind(&a.endpoint_name)
            .bind(a.principal_id.to_string())
            .bind(a.principal_type.as_str())
            .bind(a.is_default)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        tracing::info!(
            principals = snapshot.principals.len(),
            groups = snapshot.groups.len(),
            tables = snapshot.tables.len(),
            grants = snapshot.grants.len(),
            "Imported RBAC snapshot into SQLite"
        );
        Ok(())
    }

    /// Assign an endpoint in a single transaction. A new default replaces
    /// the principal's previous default.
    pub async fn assign_compute(&self, assignment: &ComputeAssignment) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if assignment.is_default {
            sqlx::query(
                "UPDATE compute_assignments SET is_default = 0 \
                 WHERE principal_id = ? AND principal_type = ?",
            )
            .bind(assignment.principal_id.to_string())
            .bind(assignment.principal_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        sqlx::query(
            "INSERT OR REPLACE INTO compute_assignments \
             (endpoint_name, principal_id, principal_type, is_default) VALUES (?, ?, ?, ?)",
        )
        .bind(&assignment.endpoint_name)
        .bind(assignment.principal_id.to_string())
        .bind(assignment.principal_type.as_str())
        .bind(assignment.is_default)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    pub async fn unassign_compute(
        &self,
        endpoint_name: &str,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM compute_assignments \
             WHERE endpoint_name = ? AND principal_id = ? AND principal_type = ?",
        )
        .bind(endpoint_name)
        .bind(principal_id.to_string())
        .bind(principal_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_endpoint_status(&self, name: &str, status: EndpointStatus) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE compute_endpoints SET status = ?, updated_at = ? WHERE name = ?",
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidReference(format!(
                "compute endpoint '{}' does not exist",
                name
            )));
        }
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn kind_str(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::User => "user",
        PrincipalKind::Service => "service",
    }
}

fn uuid_col(row: &SqliteRow, col: &str) -> StoreResult<Uuid> {
    let raw: String = row.try_get(col).map_err(backend)?;
    Uuid::parse_str(&raw).map_err(|e| StoreError::Backend(format!("bad uuid in {}: {}", col, e)))
}

fn parse_col<T: FromStr<Err = String>>(row: &SqliteRow, col: &str) -> StoreResult<T> {
    let raw: String = row.try_get(col).map_err(backend)?;
    raw.parse().map_err(StoreError::Backend)
}

fn endpoint_from_row(row: &SqliteRow) -> StoreResult<ComputeEndpoint> {
    let kind: String = row.try_get("kind").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    let updated_at: String = row.try_get("updated_at").map_err(backend)?;
    Ok(ComputeEndpoint {
        id: uuid_col(row, "id")?,
        name: row.try_get("name").map_err(backend)?,
        kind: match kind.as_str() {
            "LOCAL" => EndpointKind::Local,
            "REMOTE" => EndpointKind::Remote,
            other => return Err(StoreError::Backend(format!("bad endpoint kind '{}'", other))),
        },
        status: match status.as_str() {
            "ACTIVE" => EndpointStatus::Active,
            "INACTIVE" => EndpointStatus::Inactive,
            other => return Err(StoreError::Backend(format!("bad endpoint status '{}'", other))),
        },
        url: row.try_get("url").map_err(backend)?,
        auth_token: row.try_get("auth_token").map_err(backend)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl PrincipalRepository for SqliteStore {
    async fn principal_by_name(&self, name: &str) -> StoreResult<Option<Principal>> {
        let row = sqlx::query("SELECT id, name, kind, is_admin FROM principals WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let kind: String = row.try_get("kind").map_err(backend)?;
        Ok(Some(Principal {
            id: uuid_col(&row, "id")?,
            name: row.try_get("name").map_err(backend)?,
            kind: if kind == "service" {
                PrincipalKind::Service
            } else {
                PrincipalKind::User
            },
            is_admin: row.try_get("is_admin").map_err(backend)?,
        }))
    }
}

#[async_trait]
impl GroupRepository for SqliteStore {
    async fn groups_for_member(
        &self,
        member_type: PrincipalType,
        member_id: Uuid,
    ) -> StoreResult<Vec<Group>> {
        let rows = sqlx::query(
            "SELECT g.id, g.name FROM principal_groups g \
             JOIN group_members m ON m.group_id = g.id \
             WHERE m.member_type = ? AND m.member_id = ?",
        )
        .bind(member_type.as_str())
        .bind(member_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                Ok(Group {
                    id: uuid_col(row, "id")?,
                    name: row.try_get("name").map_err(backend)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl GrantRepository for SqliteStore {
    async fn privileges(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
        securable_type: SecurableType,
        securable_id: Uuid,
    ) -> StoreResult<Vec<Privilege>> {
        let rows = sqlx::query(
            "SELECT privilege FROM privilege_grants \
             WHERE principal_type = ? AND principal_id = ? \
             AND securable_type = ? AND securable_id = ?",
        )
        .bind(principal_type.as_str())
        .bind(principal_id.to_string())
        .bind(securable_type.as_str())
        .bind(securable_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(|row| parse_col(row, "privilege")).collect()
    }
}

#[async_trait]
impl RowFilterRepository for SqliteStore {
    async fn bound_row_filters(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Vec<RowFilter>> {
        let rows = sqlx::query(
            "SELECT f.id, f.table_id, f.name, f.filter_sql FROM row_filters f \
             JOIN row_filter_bindings b ON b.row_filter_id = f.id \
             WHERE f.table_id = ? AND b.principal_type = ? AND b.principal_id = ?",
        )
        .bind(table_id.to_string())
        .bind(principal_type.as_str())
        .bind(principal_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                Ok(RowFilter {
                    id: uuid_col(row, "id")?,
                    table_id: uuid_col(row, "table_id")?,
                    name: row.try_get("name").map_err(backend)?,
                    filter_sql: row.try_get("filter_sql").map_err(backend)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ColumnMaskRepository for SqliteStore {
    async fn bound_column_masks(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Vec<BoundColumnMask>> {
        let rows = sqlx::query(
            "SELECT m.id, m.table_id, m.column_name, m.mask_expression, b.see_original \
             FROM column_masks m \
             JOIN column_mask_bindings b ON b.column_mask_id = m.id \
             WHERE m.table_id = ? AND b.principal_type = ? AND b.principal_id = ?",
        )
        .bind(table_id.to_string())
        .bind(principal_type.as_str())
        .bind(principal_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                Ok(BoundColumnMask {
                    mask: ColumnMask {
                        id: uuid_col(row, "id")?,
                        table_id: uuid_col(row, "table_id")?,
                        column_name: row.try_get("column_name").map_err(backend)?,
                        mask_expression: row.try_get("mask_expression").map_err(backend)?,
                    },
                    see_original: row.try_get("see_original").map_err(backend)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ComputeRepository for SqliteStore {
    async fn default_assignment(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Option<ComputeAssignment>> {
        let row = sqlx::query(
            "SELECT endpoint_name, is_default FROM compute_assignments \
             WHERE principal_type = ? AND principal_id = ? AND is_default = 1 \
             ORDER BY endpoint_name LIMIT 1",
        )
        .bind(principal_type.as_str())
        .bind(principal_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|row| {
            Ok(ComputeAssignment {
                endpoint_name: row.try_get("endpoint_name").map_err(backend)?,
                principal_id,
                principal_type,
                is_default: row.try_get("is_default").map_err(backend)?,
            })
        })
        .transpose()
    }

    async fn endpoint_by_name(&self, name: &str) -> StoreResult<Option<ComputeEndpoint>> {
        let row = sqlx::query(
            "SELECT id, name, kind, status, url, auth_token, updated_at \
             FROM compute_endpoints WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(endpoint_from_row).transpose()
    }
}

#[async_trait]
impl CatalogRepository for SqliteStore {
    async fn root_catalog(&self) -> StoreResult<Securable> {
        let row = sqlx::query("SELECT id FROM catalogs ORDER BY name LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::Backend("metastore has no catalog".to_string()))?;
        Ok(Securable::Catalog {
            id: uuid_col(&row, "id")?,
        })
    }

    async fn lookup_table(&self, name: &TableName) -> StoreResult<Option<TableInfo>> {
        let row = sqlx::query(
            "SELECT t.id, t.name, t.columns, s.id AS schema_id, s.name AS schema_name, \
             c.id AS catalog_id, c.name AS catalog_name \
             FROM tables t \
             JOIN schemas s ON s.id = t.schema_id \
             JOIN catalogs c ON c.id = s.catalog_id \
             WHERE s.name = ? AND t.name = ?",
        )
        .bind(name.schema_or_default())
        .bind(&name.table)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };

        if let Some(catalog) = &name.catalog {
            let catalog_name: String = row.try_get("catalog_name").map_err(backend)?;
            if !catalog.eq_ignore_ascii_case(&catalog_name) {
                return Ok(None);
            }
        }

        let columns: String = row.try_get("columns").map_err(backend)?;
        Ok(Some(TableInfo {
            id: uuid_col(&row, "id")?,
            name: row.try_get("name").map_err(backend)?,
            schema_id: uuid_col(&row, "schema_id")?,
            schema_name: row.try_get("schema_name").map_err(backend)?,
            catalog_id: uuid_col(&row, "catalog_id")?,
            columns: serde_json::from_str(&columns)
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        }))
    }
}
