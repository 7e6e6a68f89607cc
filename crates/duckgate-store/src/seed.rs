//! YAML seed for RBAC state.
//!
//! Everything in a seed is referenced by name; [`RbacSeed::resolve`] checks
//! every reference and assigns ids.
//!
//! ```yaml
//! catalog: memory
//! schemas:
//!   - name: main
//!     tables:
//!       - name: titanic
//!         columns: [PassengerId, Survived, Pclass, Name]
//! principals:
//!   - name: alice
//! groups:
//!   - name: analysts
//!     members:
//!       - user: alice
//! grants:
//!   - group: analysts
//!     on: table
//!     name: main.titanic
//!     privilege: SELECT
//! row_filters:
//!   - name: first_class
//!     table: main.titanic
//!     filter: "Pclass = 1"
//!     bindings:
//!       - group: analysts
//! column_masks:
//!   - table: main.titanic
//!     column: Name
//!     mask: "'***'"
//!     bindings:
//!       - group: analysts
//! compute:
//!   endpoints:
//!     - name: agent-1
//!       kind: REMOTE
//!       url: grpc://10.0.0.7:50051
//!       auth_token_env: AGENT_1_TOKEN
//!   assignments:
//!     - endpoint: agent-1
//!       group: analysts
//! ```

use std::fs;
use std::path::Path;

use chrono::Utc;
use duckgate_core::{
    ColumnMask, ColumnMaskBinding, ComputeAssignment, ComputeEndpoint, EndpointKind,
    EndpointStatus, Group, GroupMember, Principal, PrincipalKind, PrincipalType, Privilege,
    PrivilegeGrant, RowFilter, RowFilterBinding, Securable, SecurableType, StoreError,
    StoreResult, TableInfo, TableName,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::{RbacSnapshot, SchemaEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacSeed {
    #[serde(default = "default_catalog")]
    pub catalog: String,
    #[serde(default)]
    pub schemas: Vec<SchemaSeed>,
    #[serde(default)]
    pub principals: Vec<PrincipalSeed>,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
    #[serde(default)]
    pub grants: Vec<GrantSeed>,
    #[serde(default)]
    pub row_filters: Vec<RowFilterSeed>,
    #[serde(default)]
    pub column_masks: Vec<ColumnMaskSeed>,
    #[serde(default)]
    pub compute: ComputeSeed,
}

fn default_catalog() -> String {
    "memory".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSeed {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSeed {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalSeed {
    pub name: String,
    #[serde(default)]
    pub kind: PrincipalKind,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSeed {
    pub name: String,
    #[serde(default)]
    pub members: Vec<SubjectSeed>,
}

/// Exactly one of `user` or `group`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubjectSeed {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSeed {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Securable type.
    pub on: SecurableType,
    /// Securable name: catalog name, schema name or `schema.table`.
    #[serde(default)]
    pub name: Option<String>,
    pub privilege: Privilege,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFilterSeed {
    pub name: String,
    pub table: String,
    pub filter: String,
    #[serde(default)]
    pub bindings: Vec<SubjectSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMaskSeed {
    pub table: String,
    pub column: String,
    pub mask: String,
    #[serde(default)]
    pub bindings: Vec<MaskBindingSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskBindingSeed {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub see_original: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComputeSeed {
    #[serde(default)]
    pub endpoints: Vec<EndpointSeed>,
    #[serde(default)]
    pub assignments: Vec<AssignmentSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSeed {
    pub name: String,
    pub kind: EndpointKind,
    #[serde(default)]
    pub status: EndpointStatus,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentSeed {
    pub endpoint: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_true")]
    pub is_default: bool,
}

fn default_true() -> bool {
    true
}

impl RbacSeed {
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::Backend(format!("failed to read seed {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> StoreResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| StoreError::InvalidReference(format!("invalid seed: {}", e)))
    }

    /// Validate every reference and build the corresponding snapshot.
    pub fn resolve(&self) -> StoreResult<RbacSnapshot> {
        let mut snapshot = RbacSnapshot::new(self.catalog.clone());
        let catalog_id = snapshot.catalog.id;

        for schema in &self.schemas {
            if snapshot.schema_by_name(&schema.name).is_some() {
                return Err(conflict("schema", &schema.name));
            }
            let entry = SchemaEntry {
                id: Uuid::new_v4(),
                catalog_id,
                name: schema.name.clone(),
            };
            for table in &schema.tables {
                if snapshot
                    .tables
                    .iter()
                    .any(|t| t.schema_id == entry.id && t.name.eq_ignore_ascii_case(&table.name))
                {
                    return Err(conflict("table", &format!("{}.{}", schema.name, table.name)));
                }
                snapshot.tables.push(TableInfo {
                    id: Uuid::new_v4(),
                    name: table.name.clone(),
                    schema_id: entry.id,
                    schema_name: entry.name.clone(),
                    catalog_id,
                    columns: table.columns.clone(),
                });
            }
            snapshot.schemas.push(entry);
        }

        for p in &self.principals {
            if snapshot.principal_by_name(&p.name).is_some() {
                return Err(conflict("principal", &p.name));
            }
            snapshot.principals.push(Principal {
                id: Uuid::new_v4(),
                name: p.name.clone(),
                kind: p.kind,
                is_admin: p.is_admin,
            });
        }

        for g in &self.groups {
            if snapshot.group_by_name(&g.name).is_some() {
                return Err(conflict("group", &g.name));
            }
            snapshot.groups.push(Group::new(g.name.clone()));
        }

        // Members are resolved after every group exists so nested groups may
        // be declared in any order.
        for g in &self.groups {
            let group_id = snapshot
                .group_by_name(&g.name)
                .map(|group| group.id)
                .ok_or_else(|| invalid("group", &g.name))?;
            for member in &g.members {
                let (member_type, member_id) =
                    subject(&snapshot, member.user.as_deref(), member.group.as_deref())?;
                snapshot.members.push(GroupMember {
                    group_id,
                    member_type,
                    member_id,
                });
            }
        }

        for grant in &self.grants {
            let (principal_type, principal_id) =
                subject(&snapshot, grant.user.as_deref(), grant.group.as_deref())?;
            let securable = securable(&snapshot, grant.on, grant.name.as_deref())?;
            let grant = PrivilegeGrant {
                principal_id,
                principal_type,
                securable_type: securable.securable_type(),
                securable_id: securable.id(),
                privilege: grant.privilege,
            };
            if !snapshot.grants.contains(&grant) {
                snapshot.grants.push(grant);
            }
        }

        for rf in &self.row_filters {
            let table = table(&snapshot, &rf.table)?;
            let filter = RowFilter {
                id: Uuid::new_v4(),
                table_id: table.id,
                name: rf.name.clone(),
                filter_sql: rf.filter.clone(),
            };
            for binding in &rf.bindings {
                let (principal_type, principal_id) =
                    subject(&snapshot, binding.user.as_deref(), binding.group.as_deref())?;
                snapshot.row_filter_bindings.push(RowFilterBinding {
                    row_filter_id: filter.id,
                    principal_id,
                    principal_type,
                });
            }
            snapshot.row_filters.push(filter);
        }

        for cm in &self.column_masks {
            let table = table(&snapshot, &cm.table)?;
            if !table.columns.iter().any(|c| c.eq_ignore_ascii_case(&cm.column)) {
                return Err(invalid("column", &format!("{}.{}", cm.table, cm.column)));
            }
            let mask = ColumnMask {
                id: Uuid::new_v4(),
                table_id: table.id,
                column_name: cm.column.clone(),
                mask_expression: cm.mask.clone(),
            };
            for binding in &cm.bindings {
                let (principal_type, principal_id) =
                    subject(&snapshot, binding.user.as_deref(), binding.group.as_deref())?;
                snapshot.column_mask_bindings.push(ColumnMaskBinding {
                    column_mask_id: mask.id,
                    principal_id,
                    principal_type,
                    see_original: binding.see_original,
                });
            }
            snapshot.column_masks.push(mask);
        }

        for ep in &self.compute.endpoints {
            if snapshot.endpoint_by_name(&ep.name).is_some() {
                return Err(conflict("compute endpoint", &ep.name));
            }
            let auth_token = match (&ep.auth_token, &ep.auth_token_env) {
                (Some(token), _) => Some(token.clone()),
                (None, Some(var)) => Some(std::env::var(var).map_err(|_| {
                    StoreError::InvalidReference(format!(
                        "environment variable {} for endpoint '{}' is not set",
                        var, ep.name
                    ))
                })?),
                (None, None) => None,
            };
            snapshot.endpoints.push(ComputeEndpoint {
                id: Uuid::new_v4(),
                name: ep.name.clone(),
                kind: ep.kind,
                status: ep.status,
                url: ep.url.clone(),
                auth_token,
                updated_at: Utc::now(),
            });
        }

        for a in &self.compute.assignments {
            if snapshot.endpoint_by_name(&a.endpoint).is_none() {
                return Err(invalid("compute endpoint", &a.endpoint));
            }
            let (principal_type, principal_id) =
                subject(&snapshot, a.user.as_deref(), a.group.as_deref())?;
            if a.is_default
                && snapshot
                    .default_assignment(principal_type, principal_id)
                    .is_some()
            {
                return Err(StoreError::Conflict(format!(
                    "{} '{}' has more than one default compute assignment",
                    principal_type,
                    a.user.as_deref().or(a.group.as_deref()).unwrap_or_default()
                )));
            }
            snapshot.assignments.push(ComputeAssignment {
                endpoint_name: a.endpoint.clone(),
                principal_id,
                principal_type,
                is_default: a.is_default,
            });
        }

        Ok(snapshot)
    }
}

fn conflict(kind: &str, name: &str) -> StoreError {
    StoreError::Conflict(format!("duplicate {} '{}'", kind, name))
}

fn invalid(kind: &str, name: &str) -> StoreError {
    StoreError::InvalidReference(format!("unknown {} '{}'", kind, name))
}

fn subject(
    snapshot: &RbacSnapshot,
    user: Option<&str>,
    group: Option<&str>,
) -> StoreResult<(PrincipalType, Uuid)> {
    match (user, group) {
        (Some(user), None) => snapshot
            .principal_by_name(user)
            .map(|p| (PrincipalType::User, p.id))
            .ok_or_else(|| invalid("principal", user)),
        (None, Some(group)) => snapshot
            .group_by_name(group)
            .map(|g| (PrincipalType::Group, g.id))
            .ok_or_else(|| invalid("group", group)),
        _ => Err(StoreError::InvalidReference(
            "exactly one of 'user' or 'group' must be set".to_string(),
        )),
    }
}

fn table(snapshot: &RbacSnapshot, name: &str) -> StoreResult<TableInfo> {
    let parts: Vec<String> = name.split('.').map(str::to_string).collect();
    TableName::from_parts(&parts)
        .and_then(|table_name| snapshot.lookup_table(&table_name))
        .ok_or_else(|| invalid("table", name))
}

fn securable(
    snapshot: &RbacSnapshot,
    securable_type: SecurableType,
    name: Option<&str>,
) -> StoreResult<Securable> {
    let catalog_id = snapshot.catalog.id;
    match securable_type {
        SecurableType::Catalog => match name {
            None => Ok(Securable::Catalog { id: catalog_id }),
            Some(n) if n.eq_ignore_ascii_case(&snapshot.catalog.name) => {
                Ok(Securable::Catalog { id: catalog_id })
            }
            Some(n) => Err(invalid("catalog", n)),
        },
        SecurableType::Schema => {
            let name = name.ok_or_else(|| invalid("schema", "<missing>"))?;
            snapshot
                .schema_by_name(name)
                .map(|s| Securable::Schema {
                    id: s.id,
                    catalog_id,
                })
                .ok_or_else(|| invalid("schema", name))
        }
        SecurableType::Table => {
            let name = name.ok_or_else(|| invalid("table", "<missing>"))?;
            Ok(table(snapshot, name)?.securable())
        }
    }
}
