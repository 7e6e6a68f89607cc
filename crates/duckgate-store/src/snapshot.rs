//! Point-in-time RBAC state and the lookups the gateway needs.

use duckgate_core::{
    BoundColumnMask, ColumnMask, ColumnMaskBinding, ComputeAssignment, ComputeEndpoint, Group,
    GroupMember, Principal, PrincipalType, Privilege, PrivilegeGrant, RowFilter,
    RowFilterBinding, SecurableType, TableInfo, TableName,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub id: Uuid,
    pub catalog_id: Uuid,
    pub name: String,
}

/// Everything an RBAC store holds.
#[derive(Debug, Clone)]
pub struct RbacSnapshot {
    pub catalog: CatalogEntry,
    pub schemas: Vec<SchemaEntry>,
    pub tables: Vec<TableInfo>,
    pub principals: Vec<Principal>,
    pub groups: Vec<Group>,
    pub members: Vec<GroupMember>,
    pub grants: Vec<PrivilegeGrant>,
    pub row_filters: Vec<RowFilter>,
    pub row_filter_bindings: Vec<RowFilterBinding>,
    pub column_masks: Vec<ColumnMask>,
    pub column_mask_bindings: Vec<ColumnMaskBinding>,
    pub endpoints: Vec<ComputeEndpoint>,
    pub assignments: Vec<ComputeAssignment>,
}

impl RbacSnapshot {
    /// Empty state for a single catalog.
    pub fn new(catalog_name: impl Into<String>) -> Self {
        Self {
            catalog: CatalogEntry {
                id: Uuid::new_v4(),
                name: catalog_name.into(),
            },
            schemas: Vec::new(),
            tables: Vec::new(),
            principals: Vec::new(),
            groups: Vec::new(),
            members: Vec::new(),
            grants: Vec::new(),
            row_filters: Vec::new(),
            row_filter_bindings: Vec::new(),
            column_masks: Vec::new(),
            column_mask_bindings: Vec::new(),
            endpoints: Vec::new(),
            assignments: Vec::new(),
        }
    }

    pub fn principal_by_name(&self, name: &str) -> Option<&Principal> {
        self.principals.iter().find(|p| p.name == name)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn schema_by_name(&self, name: &str) -> Option<&SchemaEntry> {
        self.schemas
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn groups_for_member(&self, member_type: PrincipalType, member_id: Uuid) -> Vec<Group> {
        self.members
            .iter()
            .filter(|m| m.member_type == member_type && m.member_id == member_id)
            .filter_map(|m| self.groups.iter().find(|g| g.id == m.group_id))
            .cloned()
            .collect()
    }

    pub fn privileges(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
        securable_type: SecurableType,
        securable_id: Uuid,
    ) -> Vec<Privilege> {
        self.grants
            .iter()
            .filter(|g| {
                g.principal_type == principal_type
                    && g.principal_id == principal_id
                    && g.securable_type == securable_type
                    && g.securable_id == securable_id
            })
            .map(|g| g.privilege)
            .collect()
    }

    pub fn bound_row_filters(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> Vec<RowFilter> {
        self.row_filters
            .iter()
            .filter(|f| f.table_id == table_id)
            .filter(|f| {
                self.row_filter_bindings.iter().any(|b| {
                    b.row_filter_id == f.id
                        && b.principal_type == principal_type
                        && b.principal_id == principal_id
                })
            })
            .cloned()
            .collect()
    }

    pub fn bound_column_masks(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> Vec<BoundColumnMask> {
        let mut bound = Vec::new();
        for mask in self.column_masks.iter().filter(|m| m.table_id == table_id) {
            for binding in self.column_mask_bindings.iter().filter(|b| {
                b.column_mask_id == mask.id
                    && b.principal_type == principal_type
                    && b.principal_id == principal_id
            }) {
                bound.push(BoundColumnMask {
                    mask: mask.clone(),
                    see_original: binding.see_original,
                });
            }
        }
        bound
    }

    pub fn default_assignment(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> Option<ComputeAssignment> {
        self.assignments
            .iter()
            .find(|a| {
                a.is_default && a.principal_type == principal_type && a.principal_id == principal_id
            })
            .cloned()
    }

    pub fn endpoint_by_name(&self, name: &str) -> Option<&ComputeEndpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Resolve a SQL table reference. Identifiers compare case-insensitively
    /// and an unqualified schema means `main`.
    pub fn lookup_table(&self, name: &TableName) -> Option<TableInfo> {
        if let Some(catalog) = &name.catalog {
            if !catalog.eq_ignore_ascii_case(&self.catalog.name) {
                return None;
            }
        }
        let schema = name.schema_or_default();
        self.tables
            .iter()
            .find(|t| {
                t.schema_name.eq_ignore_ascii_case(schema) && t.name.eq_ignore_ascii_case(&name.table)
            })
            .cloned()
    }
}
