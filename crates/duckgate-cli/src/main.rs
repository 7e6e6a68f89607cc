use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use duckgate_core::GatewayConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "duckgate", version, about = "Governed SQL gateway for DuckDB")]
struct Cli {
    /// Gateway configuration file
    #[arg(long, short, env = "DUCKGATE_CONFIG", default_value = "duckgate.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authorize, rewrite and execute a statement as a principal
    Query {
        /// Principal name
        #[arg(long = "as")]
        principal: String,

        #[arg(long)]
        sql: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Show how a statement would be rewritten for a principal, without running it
    Rewrite {
        #[arg(long = "as")]
        principal: String,

        #[arg(long)]
        sql: String,
    },

    /// Check the health of a compute endpoint
    Health {
        /// Endpoint name (`local` for in-process execution)
        endpoint: String,
    },

    /// Validate the configuration and RBAC seed
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GatewayConfig::load_with_context(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Query {
            principal,
            sql,
            format,
        } => commands::query::run(&config, &principal, &sql, format).await,
        Command::Rewrite { principal, sql } => {
            commands::rewrite::run(&config, &principal, &sql).await
        }
        Command::Health { endpoint } => commands::health::run(&config, &endpoint).await,
        Command::Check => commands::check::run(&config),
    }
}
