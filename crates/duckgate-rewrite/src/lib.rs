//! # duckgate-rewrite
//!
//! Statement analysis and row/column security rewriting.
//!
//! Every request goes through three steps:
//!
//! 1. [`SqlAnalyzer`] parses exactly one statement with the DuckDB dialect,
//!    classifies it and collects the tables, CTEs and functions it uses.
//! 2. [`SqlRewriter::authorize`] checks the privileges the statement kind
//!    requires on every referenced table and gathers row filters and column
//!    masks for `SELECT`s.
//! 3. [`SqlRewriter::apply`] replaces each filtered or masked table
//!    reference with a derived relation under the same alias.
//!
//! ```text
//! SELECT t.Name FROM titanic AS t
//!   => SELECT t.Name FROM (SELECT "PassengerId", '***' AS "Name", ...
//!                          FROM titanic WHERE (Pclass = 1)) AS t
//! ```
//!
//! Writes and DDL are never filtered; they either pass the privilege check
//! unchanged or are denied.

pub mod analyzer;
pub mod error;
pub mod policy;
pub mod rewriter;

pub use analyzer::{AnalyzedStatement, BLOCKED_FUNCTIONS, SqlAnalyzer, StatementKind};
pub use error::RewriteError;
pub use policy::TablePolicy;
pub use rewriter::{AuthorizedStatement, RewriteOutcome, SqlRewriter};
