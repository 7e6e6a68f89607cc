//! # duckgate-authz
//!
//! Authorization resolution against the RBAC store.
//!
//! | Operation | Result |
//! |-----------|--------|
//! | `effective_privileges` | Direct and group-inherited grants on one securable, `ALL_PRIVILEGES` expanded |
//! | `has_privilege` | Grant check with catalog → schema → table inheritance; fails closed |
//! | `row_filters` | Bound filters, direct first, deduplicated by id |
//! | `column_masks` | Applicable masks; exempt only if every binding has `see_original` |
//!
//! Admin principals short-circuit every operation without touching the store.

pub mod resolver;

pub use resolver::{AuthorizationResolver, AuthzContext};
