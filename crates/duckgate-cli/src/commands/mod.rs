//! `duckgate` subcommands.

pub mod check;
pub mod health;
pub mod query;
pub mod rewrite;

use duckgate_core::GatewayError;

/// Turn a gateway error into a CLI failure without leaking internal detail.
pub fn fail(err: GatewayError) -> anyhow::Error {
    anyhow::anyhow!("{} ({}): {}", err.code(), err.status_code(), err.public_message())
}
