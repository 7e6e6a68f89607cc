//! In-memory RBAC store.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use duckgate_core::{
    BoundColumnMask, CatalogRepository, ColumnMask, ColumnMaskBinding, ColumnMaskRepository,
    ComputeAssignment, ComputeEndpoint, ComputeRepository, EndpointStatus, GrantRepository, Group,
    GroupMember, GroupRepository, Principal, PrincipalRepository, PrincipalType, Privilege,
    PrivilegeGrant, RowFilter, RowFilterBinding, RowFilterRepository, Securable, SecurableType,
    StoreError, StoreResult, TableInfo, TableName,
};
use uuid::Uuid;

use crate::snapshot::{RbacSnapshot, SchemaEntry};

/// RBAC store over an in-memory snapshot.
///
/// Every mutator takes the write lock once, so each administrative change is
/// a single atomic write. Queries that start after a mutator returns observe
/// the change.
pub struct MemoryStore {
    state: RwLock<RbacSnapshot>,
}

impl MemoryStore {
    pub fn new(catalog_name: impl Into<String>) -> Self {
        Self::from_snapshot(RbacSnapshot::new(catalog_name))
    }

    pub fn from_snapshot(snapshot: RbacSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StoreResult<RbacSnapshot> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, RbacSnapshot>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, RbacSnapshot>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    // ========================================================================
    // Principals and groups
    // ========================================================================

    pub fn add_principal(&self, principal: Principal) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.principal_by_name(&principal.name).is_some() {
            return Err(StoreError::Conflict(format!(
                "principal '{}' already exists",
                principal.name
            )));
        }
        state.principals.push(principal);
        Ok(())
    }

    pub fn add_group(&self, group: Group) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.group_by_name(&group.name).is_some() {
            return Err(StoreError::Conflict(format!(
                "group '{}' already exists",
                group.name
            )));
        }
        state.groups.push(group);
        Ok(())
    }

    pub fn add_member(
        &self,
        group_id: Uuid,
        member_type: PrincipalType,
        member_id: Uuid,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.groups.iter().any(|g| g.id == group_id) {
            return Err(StoreError::InvalidReference(format!(
                "group {} does not exist",
                group_id
            )));
        }
        check_subject(&state, member_type, member_id)?;
        let member = GroupMember {
            group_id,
            member_type,
            member_id,
        };
        if !state.members.contains(&member) {
            state.members.push(member);
        }
        Ok(())
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Register a table, creating its schema when needed.
    pub fn add_table(&self, schema: &str, table: &str, columns: &[&str]) -> StoreResult<TableInfo> {
        let mut state = self.write()?;
        let catalog_id = state.catalog.id;
        let existing = state.schema_by_name(schema).cloned();
        let schema_entry = match existing {
            Some(entry) => entry,
            None => {
                let entry = SchemaEntry {
                    id: Uuid::new_v4(),
                    catalog_id,
                    name: schema.to_string(),
                };
                state.schemas.push(entry.clone());
                entry
            }
        };
        if state
            .lookup_table(&TableName {
                catalog: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            })
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "table '{}.{}' already exists",
                schema, table
            )));
        }

        let info = TableInfo {
            id: Uuid::new_v4(),
            name: table.to_string(),
            schema_id: schema_entry.id,
            schema_name: schema_entry.name,
            catalog_id,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        };
        state.tables.push(info.clone());
        Ok(info)
    }

    /// The catalog securable.
    pub fn catalog_securable(&self) -> StoreResult<Securable> {
        Ok(Securable::Catalog {
            id: self.read()?.catalog.id,
        })
    }

    // ========================================================================
    // Grants
    // ========================================================================

    pub fn grant(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
        securable: &Securable,
        privilege: Privilege,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        check_subject(&state, principal_type, principal_id)?;
        let grant = PrivilegeGrant {
            principal_id,
            principal_type,
            securable_type: securable.securable_type(),
            securable_id: securable.id(),
            privilege,
        };
        if !state.grants.contains(&grant) {
            state.grants.push(grant);
        }
        Ok(())
    }

    /// Returns whether a grant was removed.
    pub fn revoke(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
        securable: &Securable,
        privilege: Privilege,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        let before = state.grants.len();
        state.grants.retain(|g| {
            !(g.principal_type == principal_type
                && g.principal_id == principal_id
                && g.securable_type == securable.securable_type()
                && g.securable_id == securable.id()
                && g.privilege == privilege)
        });
        Ok(state.grants.len() != before)
    }

    // ========================================================================
    // Row filters and column masks
    // ========================================================================

    pub fn add_row_filter(&self, table_id: Uuid, name: &str, filter_sql: &str) -> StoreResult<RowFilter> {
        let mut state = self.write()?;
        check_table(&state, table_id)?;
        let filter = RowFilter {
            id: Uuid::new_v4(),
            table_id,
            name: name.to_string(),
            filter_sql: filter_sql.to_string(),
        };
        state.row_filters.push(filter.clone());
        Ok(filter)
    }

    pub fn bind_row_filter(
        &self,
        row_filter_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.row_filters.iter().any(|f| f.id == row_filter_id) {
            return Err(StoreError::InvalidReference(format!(
                "row filter {} does not exist",
                row_filter_id
            )));
        }
        check_subject(&state, principal_type, principal_id)?;
        state.row_filter_bindings.push(RowFilterBinding {
            row_filter_id,
            principal_id,
            principal_type,
        });
        Ok(())
    }

    pub fn add_column_mask(
        &self,
        table_id: Uuid,
        column_name: &str,
        mask_expression: &str,
    ) -> StoreResult<ColumnMask> {
        let mut state = self.write()?;
        let table = check_table(&state, table_id)?;
        if !table
            .columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column_name))
        {
            return Err(StoreError::InvalidReference(format!(
                "column '{}' does not exist on '{}'",
                column_name,
                table.qualified_name()
            )));
        }
        let mask = ColumnMask {
            id: Uuid::new_v4(),
            table_id,
            column_name: column_name.to_string(),
            mask_expression: mask_expression.to_string(),
        };
        state.column_masks.push(mask.clone());
        Ok(mask)
    }

    pub fn bind_column_mask(
        &self,
        column_mask_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
        see_original: bool,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.column_masks.iter().any(|m| m.id == column_mask_id) {
            return Err(StoreError::InvalidReference(format!(
                "column mask {} does not exist",
                column_mask_id
            )));
        }
        check_subject(&state, principal_type, principal_id)?;
        state.column_mask_bindings.push(ColumnMaskBinding {
            column_mask_id,
            principal_id,
            principal_type,
            see_original,
        });
        Ok(())
    }

    // ========================================================================
    // Compute
    // ========================================================================

    pub fn add_endpoint(&self, endpoint: ComputeEndpoint) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.endpoint_by_name(&endpoint.name).is_some() {
            return Err(StoreError::Conflict(format!(
                "compute endpoint '{}' already exists",
                endpoint.name
            )));
        }
        state.endpoints.push(endpoint);
        Ok(())
    }

    pub fn set_endpoint_status(&self, name: &str, status: EndpointStatus) -> StoreResult<()> {
        self.update_endpoint(name, |ep| ep.status = status)
    }

    pub fn set_endpoint_url(&self, name: &str, url: &str) -> StoreResult<()> {
        self.update_endpoint(name, |ep| ep.url = url.to_string())
    }

    fn update_endpoint(&self, name: &str, f: impl FnOnce(&mut ComputeEndpoint)) -> StoreResult<()> {
        let mut state = self.write()?;
        let endpoint = state
            .endpoints
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                StoreError::InvalidReference(format!("compute endpoint '{}' does not exist", name))
            })?;
        f(endpoint);
        endpoint.updated_at = Utc::now();
        Ok(())
    }

    /// Assign an endpoint. A new default replaces the previous default of the
    /// same principal.
    pub fn assign_compute(&self, assignment: ComputeAssignment) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.endpoint_by_name(&assignment.endpoint_name).is_none() {
            return Err(StoreError::InvalidReference(format!(
                "compute endpoint '{}' does not exist",
                assignment.endpoint_name
            )));
        }
        check_subject(&state, assignment.principal_type, assignment.principal_id)?;
        state.assignments.retain(|a| {
            !(a.principal_type == assignment.principal_type
                && a.principal_id == assignment.principal_id
                && (a.endpoint_name == assignment.endpoint_name
                    || (assignment.is_default && a.is_default)))
        });
        state.assignments.push(assignment);
        Ok(())
    }

    /// Returns whether an assignment was removed.
    pub fn unassign_compute(
        &self,
        endpoint_name: &str,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        let before = state.assignments.len();
        state.assignments.retain(|a| {
            !(a.endpoint_name == endpoint_name
                && a.principal_type == principal_type
                && a.principal_id == principal_id)
        });
        Ok(state.assignments.len() != before)
    }
}

fn check_subject(
    state: &RbacSnapshot,
    principal_type: PrincipalType,
    principal_id: Uuid,
) -> StoreResult<()> {
    let exists = match principal_type {
        PrincipalType::User => state.principals.iter().any(|p| p.id == principal_id),
        PrincipalType::Group => state.groups.iter().any(|g| g.id == principal_id),
    };
    if exists {
        Ok(())
    } else {
        Err(StoreError::InvalidReference(format!(
            "{} {} does not exist",
            principal_type, principal_id
        )))
    }
}

fn check_table(state: &RbacSnapshot, table_id: Uuid) -> StoreResult<TableInfo> {
    state
        .tables
        .iter()
        .find(|t| t.id == table_id)
        .cloned()
        .ok_or_else(|| StoreError::InvalidReference(format!("table {} does not exist", table_id)))
}

#[async_trait]
impl PrincipalRepository for MemoryStore {
    async fn principal_by_name(&self, name: &str) -> StoreResult<Option<Principal>> {
        Ok(self.read()?.principal_by_name(name).cloned())
    }
}

#[async_trait]
impl GroupRepository for MemoryStore {
    async fn groups_for_member(
        &self,
        member_type: PrincipalType,
        member_id: Uuid,
    ) -> StoreResult<Vec<Group>> {
        Ok(self.read()?.groups_for_member(member_type, member_id))
    }
}

#[async_trait]
impl GrantRepository for MemoryStore {
    async fn privileges(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
        securable_type: SecurableType,
        securable_id: Uuid,
    ) -> StoreResult<Vec<Privilege>> {
        Ok(self
            .read()?
            .privileges(principal_type, principal_id, securable_type, securable_id))
    }
}

#[async_trait]
impl RowFilterRepository for MemoryStore {
    async fn bound_row_filters(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Vec<RowFilter>> {
        Ok(self
            .read()?
            .bound_row_filters(table_id, principal_type, principal_id))
    }
}

#[async_trait]
impl ColumnMaskRepository for MemoryStore {
    async fn bound_column_masks(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Vec<BoundColumnMask>> {
        Ok(self
            .read()?
            .bound_column_masks(table_id, principal_type, principal_id))
    }
}

#[async_trait]
impl ComputeRepository for MemoryStore {
    async fn default_assignment(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Option<ComputeAssignment>> {
        Ok(self.read()?.default_assignment(principal_type, principal_id))
    }

    async fn endpoint_by_name(&self, name: &str) -> StoreResult<Option<ComputeEndpoint>> {
        Ok(self.read()?.endpoint_by_name(name).cloned())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn root_catalog(&self) -> StoreResult<Securable> {
        self.catalog_securable()
    }

    async fn lookup_table(&self, name: &TableName) -> StoreResult<Option<TableInfo>> {
        Ok(self.read()?.lookup_table(name))
    }
}
