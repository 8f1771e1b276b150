//! `sflow run`: execute one workflow instance against live collaborators.
//!
//! Wires the reqwest call handler and an in-memory event broker into a
//! `WorkflowApplication`, runs the instance to completion (Ctrl+C cancels
//! it), prints the output document and closes the application.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;

use serverflow_core::event::InMemoryEventBroker;
use serverflow_core::workflow::definition::load_workflow_file;
use serverflow_core::workflow::WorkflowApplication;
use serverflow_infra::{default_config_dir, load_engine_config, HttpCallHandler};

/// Parse the `--input` argument; it must be a JSON document.
fn parse_input(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--input must be a JSON document")
}

pub async fn handle_run(
    file: &Path,
    input: &str,
    config_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let input = parse_input(input)?;
    let def = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow {}", file.display()))?;

    let config_dir = config_dir.unwrap_or_else(default_config_dir);
    let config = load_engine_config(&config_dir).await;
    let calls = HttpCallHandler::new(&config.http).context("Failed to build HTTP client")?;

    let app = WorkflowApplication::builder()
        .event_broker(Arc::new(InMemoryEventBroker::new()))
        .call_handler(Arc::new(calls))
        .config(config)
        .build()?;

    let instance = app.start(&def, input)?;
    let instance_id = instance.id();
    let context = Arc::clone(instance.context());

    let output = instance.output();
    tokio::pin!(output);
    let result = tokio::select! {
        result = &mut output => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%instance_id, "interrupted, cancelling instance");
            app.cancel(instance_id);
            output.await
        }
    };
    app.close().await;

    let status = context.status();
    match result {
        Ok(value) => {
            if json {
                let out = serde_json::json!({
                    "instance_id": instance_id.to_string(),
                    "workflow": def.document.name,
                    "status": status,
                    "output": value,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!(
                    "  {} Workflow '{}' {}",
                    style("*").green().bold(),
                    style(&def.document.name).cyan(),
                    status
                );
                println!("  Instance: {instance_id}");
                println!();
                println!("{}", serde_json::to_string_pretty(&value)?);
                println!();
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let out = serde_json::json!({
                    "instance_id": instance_id.to_string(),
                    "workflow": def.document.name,
                    "status": status,
                    "error": err.to_document(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            Err(anyhow::Error::new(err).context(format!(
                "Workflow '{}' {status}",
                def.document.name
            )))
        }
    }
}
