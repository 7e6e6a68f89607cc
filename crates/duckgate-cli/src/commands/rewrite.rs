//! `duckgate rewrite`

use duckgate_core::GatewayConfig;
use duckgate_engine::SecureEngine;

use super::fail;

pub async fn run(config: &GatewayConfig, principal: &str, sql: &str) -> anyhow::Result<()> {
    let engine = SecureEngine::from_config(config).await?;
    let outcome = engine.explain(principal, sql).await.map_err(fail)?;

    println!("kind:    {}", outcome.kind);
    println!("tables:  {}", outcome.tables_accessed.join(", "));
    println!("filters: {}", outcome.filters_applied);
    if !outcome.masks_applied.is_empty() {
        println!("masks:   {}", outcome.masks_applied.join(", "));
    }
    println!();
    println!("{}", outcome.rewritten_sql);
    Ok(())
}
