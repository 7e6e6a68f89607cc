//! `duckgate health`

use duckgate_core::GatewayConfig;
use duckgate_engine::SecureEngine;

use super::fail;

pub async fn run(config: &GatewayConfig, endpoint: &str) -> anyhow::Result<()> {
    let engine = SecureEngine::from_config(config).await?;
    let report = engine.health_check(endpoint).await.map_err(fail)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_healthy() {
        anyhow::bail!("endpoint '{}' is {}", report.endpoint_name, report.status);
    }
    Ok(())
}
