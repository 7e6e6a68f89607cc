//! Read-only repository interfaces consumed by the gateway.
//!
//! The gateway never writes through these traits. Store implementations
//! live in `duckgate-store`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    BoundColumnMask, ComputeAssignment, ComputeEndpoint, Group, Principal, PrincipalType,
    Privilege, RowFilter, Securable, SecurableType, TableInfo, TableName,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    async fn principal_by_name(&self, name: &str) -> StoreResult<Option<Principal>>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Groups that directly contain the given member.
    async fn groups_for_member(
        &self,
        member_type: PrincipalType,
        member_id: Uuid,
    ) -> StoreResult<Vec<Group>>;
}

#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Privileges granted directly to one user or group on one securable.
    async fn privileges(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
        securable_type: SecurableType,
        securable_id: Uuid,
    ) -> StoreResult<Vec<Privilege>>;
}

#[async_trait]
pub trait RowFilterRepository: Send + Sync {
    /// Row filters on `table_id` bound directly to one user or group.
    async fn bound_row_filters(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Vec<RowFilter>>;
}

#[async_trait]
pub trait ColumnMaskRepository: Send + Sync {
    /// Column masks on `table_id` bound directly to one user or group.
    async fn bound_column_masks(
        &self,
        table_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Vec<BoundColumnMask>>;
}

#[async_trait]
pub trait ComputeRepository: Send + Sync {
    /// The default assignment of one user or group, if any.
    async fn default_assignment(
        &self,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> StoreResult<Option<ComputeAssignment>>;

    async fn endpoint_by_name(&self, name: &str) -> StoreResult<Option<ComputeEndpoint>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// The catalog every schema and table belongs to.
    async fn root_catalog(&self) -> StoreResult<Securable>;

    /// Resolve a table reference as written in SQL.
    async fn lookup_table(&self, name: &TableName) -> StoreResult<Option<TableInfo>>;
}

/// Everything the gateway reads from the RBAC metastore.
pub trait RbacStore:
    PrincipalRepository
    + GroupRepository
    + GrantRepository
    + RowFilterRepository
    + ColumnMaskRepository
    + ComputeRepository
    + CatalogRepository
{
}

impl<T> RbacStore for T where
    T: PrincipalRepository
        + GroupRepository
        + GrantRepository
        + RowFilterRepository
        + ColumnMaskRepository
        + ComputeRepository
        + CatalogRepository
{
}
