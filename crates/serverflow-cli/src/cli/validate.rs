//! `sflow validate`: parse and structurally check definitions.

use std::path::Path;

use anyhow::{bail, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use serverflow_core::workflow::definition::{discover_workflows, load_workflow_file};
use serverflow_types::workflow::WorkflowDefinition;

pub fn handle_validate(path: &Path, json: bool) -> Result<()> {
    if path.is_dir() {
        validate_dir(path, json)
    } else {
        validate_file(path, json)
    }
}

fn summary(def: &WorkflowDefinition) -> serde_json::Value {
    serde_json::json!({
        "namespace": def.document.namespace,
        "name": def.document.name,
        "version": def.document.version,
        "tasks": def.tasks.len(),
    })
}

fn validate_file(path: &Path, json: bool) -> Result<()> {
    let def = match load_workflow_file(path) {
        Ok(def) => def,
        Err(e) => {
            if json {
                let out = serde_json::json!({
                    "file": path.display().to_string(),
                    "valid": false,
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            bail!("{} is not a valid workflow: {e}", path.display());
        }
    };

    if json {
        let mut out = summary(&def);
        out["file"] = serde_json::json!(path.display().to_string());
        out["valid"] = serde_json::json!(true);
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Workflow '{}' is valid",
            style("*").green().bold(),
            style(&def.document.name).cyan()
        );
        println!("  Version: {}", def.document.version);
        println!("  Namespace: {}", def.document.namespace);
        println!("  Tasks: {}", def.tasks.len());
        println!();
    }
    Ok(())
}

fn validate_dir(dir: &Path, json: bool) -> Result<()> {
    let found = discover_workflows(dir)?;
    let invalid = found.iter().filter(|(_, result)| result.is_err()).count();

    if json {
        let entries: Vec<serde_json::Value> = found
            .iter()
            .map(|(path, result)| match result {
                Ok(def) => {
                    let mut entry = summary(def);
                    entry["file"] = serde_json::json!(path.display().to_string());
                    entry["valid"] = serde_json::json!(true);
                    entry
                }
                Err(e) => serde_json::json!({
                    "file": path.display().to_string(),
                    "valid": false,
                    "error": e.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if found.is_empty() {
        println!();
        println!("  No workflow files found in {}", dir.display());
        println!();
    } else {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["File", "Workflow", "Tasks", "Result"]);

        for (path, result) in &found {
            let file = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .display()
                .to_string();
            match result {
                Ok(def) => table.add_row(vec![
                    Cell::new(file),
                    Cell::new(format!("{}@{}", def.document.name, def.document.version)),
                    Cell::new(def.tasks.len()),
                    Cell::new("valid").fg(Color::Green),
                ]),
                Err(e) => table.add_row(vec![
                    Cell::new(file),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new(e.to_string()).fg(Color::Red),
                ]),
            };
        }
        println!();
        println!("{table}");
        println!();
    }

    if invalid > 0 {
        bail!("{invalid} of {} workflow files are invalid", found.len());
    }
    Ok(())
}
