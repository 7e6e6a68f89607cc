//! `duckgate query`

use duckgate_core::GatewayConfig;
use duckgate_engine::{QueryContext, QueryResult, SecureEngine};
use serde_json::Value;
use tracing::debug;

use super::fail;
use crate::OutputFormat;

pub async fn run(
    config: &GatewayConfig,
    principal: &str,
    sql: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let engine = SecureEngine::from_config(config).await?;

    let ctx = QueryContext::new();
    let cancel = ctx.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling query");
            cancel.cancel();
        }
    });

    let result = engine.query(&ctx, principal, sql).await.map_err(fail)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => {
            print!("{}", render_table(&result));
            println!(
                "({} row{}, compute: {}{})",
                result.row_count,
                if result.row_count == 1 { "" } else { "s" },
                result.compute,
                if result.cached { ", cached" } else { "" }
            );
        }
    }
    Ok(())
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Plain-text table with one header row.
pub fn render_table(result: &QueryResult) -> String {
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, value) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(value.chars().count());
            }
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(&result.columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_engine::StatementKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_render_table() {
        let result = QueryResult {
            columns: vec!["Pclass".into(), "Name".into()],
            rows: vec![
                vec![json!(1), json!("***")],
                vec![json!(1), Value::Null],
            ],
            row_count: 2,
            statement_kind: StatementKind::Select,
            compute: "local".into(),
            cached: false,
            duration_ms: 3,
        };
        assert_eq!(
            render_table(&result),
            "Pclass | Name\n-------+-----\n1      | ***\n1      | NULL\n"
        );
    }
}
