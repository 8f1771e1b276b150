//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML/JSON documents and `WorkflowDefinition`, validates
//! structural constraints, and discovers definition files on disk. Structural
//! validation reuses the executor builder as a dry run, so anything that
//! validates here also builds in an application.

use std::path::{Path, PathBuf};

use serverflow_types::workflow::WorkflowDefinition;
use thiserror::Error;

use super::error::BuildError;
use super::executor::ExecutorBuilder;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating definitions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Document-level constraint violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// The task tree does not build.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse a JSON string into a validated `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and free of whitespace
/// - At least one task exists
/// - The workflow timeout, if set, is non-zero
/// - The task tree builds: unique sibling names, jump targets exist,
///   listens have filters, forks have branches, retry policies are sane
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    let name = &def.document.name;
    if name.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(DefinitionError::Validation(format!(
            "workflow name '{name}' must not contain whitespace"
        )));
    }

    if def.tasks.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow must have at least one task".to_string(),
        ));
    }

    if def.timeout.is_some_and(|t| t.to_duration().is_zero()) {
        return Err(DefinitionError::Validation(
            "workflow timeout must be > 0".to_string(),
        ));
    }

    ExecutorBuilder::build_workflow(def)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition file; `.json` files are read as JSON, anything
/// else as YAML.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

/// Save a workflow definition as YAML, creating parent directories.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover every definition file (`.yaml`, `.yml`, `.json`) under `base_dir`.
///
/// Returns each file with its load result so callers can report invalid
/// files instead of losing them.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, Result<WorkflowDefinition, DefinitionError>)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, Result<WorkflowDefinition, DefinitionError>)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_definition = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"));
        if is_definition {
            let loaded = load_workflow_file(&path);
            if let Err(e) = &loaded {
                tracing::warn!(?path, error = %e, "invalid workflow file");
            }
            results.push((path, loaded));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
