//! Error taxonomy for task execution and executor construction.
//!
//! Every runtime failure is a `TaskError`: a classified `TaskErrorKind` plus
//! the position of the task it originated from. The kind exposes the type
//! name and status that `try`/`catch` filters match against, and renders to
//! the JSON error document handed to catch handlers.

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use super::position::WorkflowPosition;

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// A classified failure annotated with the task position it originated at.
#[derive(Debug, Clone, Error)]
#[error("{kind} (at {position})")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub position: String,
}

/// Classification of task failures.
#[derive(Debug, Clone, Error)]
pub enum TaskErrorKind {
    /// Bad input or document shape.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A filter, predicate or runtime expression could not be evaluated.
    #[error("expression evaluation failed: {0}")]
    Evaluation(String),

    /// Outbound call or event transport failure.
    #[error("communication failed (status {status:?}): {message}")]
    Transport { status: Option<u16>, message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    /// A retry policy refused another attempt.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<TaskError> },

    /// A user-raised error with a custom type.
    #[error("{error_type}: {}", .detail.as_deref().unwrap_or("raised"))]
    Runtime {
        error_type: String,
        status: Option<u16>,
        title: Option<String>,
        detail: Option<String>,
    },
}

impl TaskErrorKind {
    /// Generic runtime failure (join errors, engine faults).
    pub fn runtime(detail: impl Into<String>) -> Self {
        TaskErrorKind::Runtime {
            error_type: "runtime".to_string(),
            status: Some(500),
            title: None,
            detail: Some(detail.into()),
        }
    }

    /// The type name catch filters match against.
    pub fn type_name(&self) -> &str {
        match self {
            TaskErrorKind::Validation(_) => "validation",
            TaskErrorKind::Evaluation(_) => "expression",
            TaskErrorKind::Transport { .. } => "communication",
            TaskErrorKind::Timeout(_) => "timeout",
            TaskErrorKind::Cancelled => "cancelled",
            TaskErrorKind::RetryExhausted { .. } => "retry-exhausted",
            TaskErrorKind::Runtime { error_type, .. } => error_type,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TaskErrorKind::Validation(_) | TaskErrorKind::Evaluation(_) => Some(400),
            TaskErrorKind::Transport { status, .. } => *status,
            TaskErrorKind::Timeout(_) => Some(408),
            TaskErrorKind::Cancelled => None,
            TaskErrorKind::RetryExhausted { last, .. } => last.kind.status(),
            TaskErrorKind::Runtime { status, .. } => *status,
        }
    }

    fn title(&self) -> String {
        match self {
            TaskErrorKind::Validation(_) => "Validation Error".to_string(),
            TaskErrorKind::Evaluation(_) => "Expression Error".to_string(),
            TaskErrorKind::Transport { .. } => "Communication Error".to_string(),
            TaskErrorKind::Timeout(_) => "Timeout".to_string(),
            TaskErrorKind::Cancelled => "Cancelled".to_string(),
            TaskErrorKind::RetryExhausted { .. } => "Retries Exhausted".to_string(),
            TaskErrorKind::Runtime { title, error_type, .. } => {
                title.clone().unwrap_or_else(|| error_type.clone())
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            TaskErrorKind::Validation(msg) | TaskErrorKind::Evaluation(msg) => msg.clone(),
            TaskErrorKind::Transport { message, .. } => message.clone(),
            TaskErrorKind::Runtime { detail, .. } => detail.clone().unwrap_or_default(),
            other => other.to_string(),
        }
    }
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, position: &WorkflowPosition) -> Self {
        Self {
            kind,
            position: position.to_string(),
        }
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    pub fn status(&self) -> Option<u16> {
        self.kind.status()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, TaskErrorKind::Cancelled)
    }

    /// Render the error as the document exposed to catch handlers.
    ///
    /// Shape: `{ "type", "status", "title", "detail", "instance" }` where
    /// `instance` is the originating task position.
    pub fn to_document(&self) -> Value {
        let mut doc = json!({
            "type": self.type_name(),
            "status": self.status(),
            "title": self.kind.title(),
            "detail": self.kind.detail(),
            "instance": self.position,
        });
        if let TaskErrorKind::RetryExhausted { attempts, last } = &self.kind {
            doc["attempts"] = json!(attempts);
            doc["cause"] = last.to_document();
        }
        doc
    }
}

// ---------------------------------------------------------------------------
// BuildError
// ---------------------------------------------------------------------------

/// Problems found while turning a definition into an executor tree.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("duplicate task name '{name}' at {position}")]
    DuplicateTaskName { position: String, name: String },

    #[error("task at {position} jumps to unknown sibling '{target}'")]
    UnknownFlowTarget { position: String, target: String },

    #[error("listen task at {position} has no event filters")]
    EmptyListen { position: String },

    #[error("fork task at {position} has no branches")]
    EmptyFork { position: String },

    #[error("invalid retry policy at {position}: {reason}")]
    InvalidRetry { position: String, reason: String },

    #[error("executor for {kind} task at {position} does not accept its definition")]
    Routing { position: String, kind: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
