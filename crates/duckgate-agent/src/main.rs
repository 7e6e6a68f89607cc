use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use duckgate_compute::{ComputeWorkerService, LocalExecutor, serve};
use duckgate_core::AgentConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Executes pre-authorized SQL on behalf of a duckgate gateway.
#[derive(Parser, Debug)]
#[command(name = "duckgate-agent", version, about)]
struct Args {
    /// Agent configuration file
    #[arg(long, short, env = "DUCKGATE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:50051
    #[arg(long, env = "DUCKGATE_AGENT_LISTEN")]
    listen: Option<String>,

    /// DuckDB database file; in-memory when unset
    #[arg(long, env = "DUCKGATE_AGENT_DATABASE")]
    database: Option<PathBuf>,

    /// SQL file executed on startup (repeatable)
    #[arg(long = "init-sql")]
    init_sql: Vec<PathBuf>,

    /// Shared token expected in `x-agent-token`
    #[arg(long, env = "DUCKGATE_AGENT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Maximum rows a single query may return
    #[arg(long)]
    max_result_rows: Option<usize>,

    /// Maximum queries executing at once
    #[arg(long)]
    max_concurrent_queries: Option<usize>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => AgentConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(database) = self.database {
            config.database_path = Some(database);
        }
        if !self.init_sql.is_empty() {
            config.init_sql = self.init_sql;
        }
        if let Some(token) = self.token {
            config.auth_token = Some(token);
        }
        if let Some(rows) = self.max_result_rows {
            config.max_result_rows = rows;
        }
        if let Some(n) = self.max_concurrent_queries {
            config.max_concurrent_queries = n;
        }
        Ok(config)
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config()?;
    let token = config.resolve_token()?;

    let executor = LocalExecutor::open(config.database_path.as_deref())?;
    executor.run_init_files(&config.init_sql)?;
    let version = executor.version().await?;

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        addr = %listener.local_addr()?,
        duckdb = %version,
        max_result_rows = config.max_result_rows,
        max_concurrent_queries = config.max_concurrent_queries,
        "compute agent listening"
    );

    let service = ComputeWorkerService::new(executor, &config, Some(token));
    serve(listener, service, shutdown_signal()).await?;
    Ok(())
}
