//! Domain model shared by every duckgate crate.

pub mod catalog;
pub mod compute;
pub mod policy;
pub mod principal;
pub mod securable;
pub mod statement;

pub use catalog::{DEFAULT_SCHEMA, TableInfo, TableName};
pub use compute::{ComputeAssignment, ComputeEndpoint, EndpointKind, EndpointStatus};
pub use policy::{BoundColumnMask, ColumnMask, ColumnMaskBinding, RowFilter, RowFilterBinding};
pub use principal::{Group, GroupMember, Principal, PrincipalKind, PrincipalType};
pub use securable::{Privilege, PrivilegeGrant, Securable, SecurableType};
pub use statement::StatementKind;
