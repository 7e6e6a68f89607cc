//! Row filters and column masks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::PrincipalType;

/// A boolean predicate ANDed into every query against `table_id` for the
/// principals it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    pub filter_sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilterBinding {
    pub row_filter_id: Uuid,
    pub principal_id: Uuid,
    pub principal_type: PrincipalType,
}

/// An expression substituted for a column's raw value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMask {
    pub id: Uuid,
    pub table_id: Uuid,
    pub column_name: String,
    pub mask_expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMaskBinding {
    pub column_mask_id: Uuid,
    pub principal_id: Uuid,
    pub principal_type: PrincipalType,
    #[serde(default)]
    pub see_original: bool,
}

/// A column mask as seen through one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundColumnMask {
    pub mask: ColumnMask,
    pub see_original: bool,
}
