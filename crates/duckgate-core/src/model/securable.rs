//! Securables, privileges and grants.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::principal::PrincipalType;

/// A privilege that can be granted on a securable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Privilege {
    Select,
    Modify,
    Usage,
    CreateTable,
    CreateSchema,
    AllPrivileges,
}

impl Privilege {
    /// Every privilege, `ALL_PRIVILEGES` included.
    pub const ALL: [Privilege; 6] = [
        Privilege::Select,
        Privilege::Modify,
        Privilege::Usage,
        Privilege::CreateTable,
        Privilege::CreateSchema,
        Privilege::AllPrivileges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Modify => "MODIFY",
            Self::Usage => "USAGE",
            Self::CreateTable => "CREATE_TABLE",
            Self::CreateSchema => "CREATE_SCHEMA",
            Self::AllPrivileges => "ALL_PRIVILEGES",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Privilege {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Privilege::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown privilege '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurableType {
    Catalog,
    Schema,
    Table,
}

impl SecurableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Schema => "schema",
            Self::Table => "table",
        }
    }
}

impl fmt::Display for SecurableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SecurableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "catalog" => Ok(Self::Catalog),
            "schema" => Ok(Self::Schema),
            "table" => Ok(Self::Table),
            other => Err(format!("unknown securable type '{}'", other)),
        }
    }
}

/// A securable together with its ancestry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Securable {
    Catalog { id: Uuid },
    Schema { id: Uuid, catalog_id: Uuid },
    Table { id: Uuid, schema_id: Uuid, catalog_id: Uuid },
}

impl Securable {
    pub fn securable_type(&self) -> SecurableType {
        match self {
            Self::Catalog { .. } => SecurableType::Catalog,
            Self::Schema { .. } => SecurableType::Schema,
            Self::Table { .. } => SecurableType::Table,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Catalog { id } | Self::Schema { id, .. } | Self::Table { id, .. } => *id,
        }
    }

    /// This securable followed by its parents, innermost first.
    pub fn lineage(&self) -> Vec<(SecurableType, Uuid)> {
        match *self {
            Self::Catalog { id } => vec![(SecurableType::Catalog, id)],
            Self::Schema { id, catalog_id } => vec![
                (SecurableType::Schema, id),
                (SecurableType::Catalog, catalog_id),
            ],
            Self::Table {
                id,
                schema_id,
                catalog_id,
            } => vec![
                (SecurableType::Table, id),
                (SecurableType::Schema, schema_id),
                (SecurableType::Catalog, catalog_id),
            ],
        }
    }
}

/// A privilege granted to a user or group on one securable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrivilegeGrant {
    pub principal_id: Uuid,
    pub principal_type: PrincipalType,
    pub securable_type: SecurableType,
    pub securable_id: Uuid,
    pub privilege: Privilege,
}
