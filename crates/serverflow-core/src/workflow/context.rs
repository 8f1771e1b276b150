//! Execution state: per-instance `WorkflowContext` and per-task `TaskContext`.
//!
//! A `WorkflowContext` is created for every started instance and shared as
//! an `Arc` by the executors running on its behalf. It holds the instance
//! id, the variables document written by `export`, the instance status, the
//! cancellation token, and the records of finished task contexts.
//!
//! A `TaskContext` is owned by the executor running one task node once. It
//! is never shared; retries and loop iterations get fresh ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use serverflow_types::config::EngineConfig;
use serverflow_types::instance::{InstanceSnapshot, TaskRecord, TaskStatus, WorkflowStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{EventConsumer, EventPublisher};

use super::call::CallHandler;
use super::error::{TaskError, TaskErrorKind};
use super::expression::ExpressionEvaluator;
use super::position::WorkflowPosition;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// EngineServices
// ---------------------------------------------------------------------------

/// Collaborators shared by every instance of one application.
pub struct EngineServices {
    pub consumer: Arc<dyn EventConsumer>,
    pub publisher: Arc<dyn EventPublisher>,
    pub call_handler: Arc<dyn CallHandler>,
    pub evaluator: ExpressionEvaluator,
    pub config: EngineConfig,
}

impl EngineServices {
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        publisher: Arc<dyn EventPublisher>,
        call_handler: Arc<dyn CallHandler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            consumer,
            publisher,
            call_handler,
            evaluator: ExpressionEvaluator::new(),
            config,
        }
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Variables introduced by enclosing tasks (`for` items, caught errors,
/// listen `foreach` events). Visible to expressions of nested tasks.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Map<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this scope with one more variable.
    pub fn with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(name.into(), value);
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Mutable record of one task node's execution.
///
/// `output` is `Some` exactly when the status is `Completed`; a `Failed`
/// context carries its error instead.
#[derive(Debug, Clone)]
pub struct TaskContext {
    position: WorkflowPosition,
    name: String,
    input: Value,
    output: Option<Value>,
    status: TaskStatus,
    error: Option<TaskError>,
    attempt: u32,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TaskContext {
    pub fn new(position: WorkflowPosition, name: impl Into<String>, input: Value) -> Self {
        Self {
            position,
            name: name.into(),
            input,
            output: None,
            status: TaskStatus::NotStarted,
            error: None,
            attempt: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn position(&self) -> &WorkflowPosition {
        &self.position
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// 0 before the first run, 1 during it, +1 per re-attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Replace the raw input with its filtered form.
    pub fn set_input(&mut self, input: Value) {
        self.input = input;
    }

    /// Begin an attempt.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.attempt += 1;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_retrying(&mut self) {
        self.status = TaskStatus::Retrying;
    }

    pub fn complete(&mut self, output: Value) {
        self.status = TaskStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: TaskError) {
        self.status = TaskStatus::Failed;
        self.output = None;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// A classified error originating at this task.
    pub fn error_at(&self, kind: TaskErrorKind) -> TaskError {
        TaskError::new(kind, &self.position)
    }

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            position: self.position.to_string(),
            name: self.name.clone(),
            status: self.status,
            attempt: self.attempt,
            output: self.output.clone(),
            error: self.error.as_ref().map(TaskError::to_document),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Per-instance execution environment.
pub struct WorkflowContext {
    instance_id: Uuid,
    workflow_name: String,
    variables: Mutex<Value>,
    status: Mutex<WorkflowStatus>,
    cancel_requested: AtomicBool,
    cancel: CancellationToken,
    records: Mutex<Vec<TaskRecord>>,
    services: Arc<EngineServices>,
}

impl WorkflowContext {
    pub fn new(workflow_name: impl Into<String>, services: Arc<EngineServices>) -> Self {
        Self::with_id(Uuid::now_v7(), workflow_name, services)
    }

    pub fn with_id(
        instance_id: Uuid,
        workflow_name: impl Into<String>,
        services: Arc<EngineServices>,
    ) -> Self {
        Self {
            instance_id,
            workflow_name: workflow_name.into(),
            variables: Mutex::new(json!({})),
            status: Mutex::new(WorkflowStatus::Pending),
            cancel_requested: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            records: Mutex::new(Vec::new()),
            services,
        }
    }

    /// Re-create a context from a snapshot, keeping its id, variables and records.
    ///
    /// Terminal and running statuses are not carried over; the restored
    /// context starts out `Pending`.
    pub fn restore(snapshot: InstanceSnapshot, services: Arc<EngineServices>) -> Self {
        let ctx = Self::with_id(snapshot.instance_id, snapshot.workflow_name, services);
        ctx.set_variables(snapshot.variables);
        *lock(&ctx.records) = snapshot.tasks;
        ctx
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: self.instance_id,
            workflow_name: self.workflow_name.clone(),
            status: self.status(),
            variables: self.variables(),
            tasks: self.records(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn evaluator(&self) -> &ExpressionEvaluator {
        &self.services.evaluator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn variables(&self) -> Value {
        lock(&self.variables).clone()
    }

    pub fn set_variables(&self, variables: Value) {
        *lock(&self.variables) = variables;
    }

    pub fn status(&self) -> WorkflowStatus {
        *lock(&self.status)
    }

    pub fn set_status(&self, status: WorkflowStatus) {
        *lock(&self.status) = status;
    }

    // -- Cancellation --

    /// Request cooperative cancellation. Returns `true` only for the first request.
    pub fn cancel(&self) -> bool {
        let first = !self.cancel_requested.swap(true, Ordering::SeqCst);
        self.cancel.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // -- Task records --

    pub fn record(&self, task: &TaskContext) {
        lock(&self.records).push(task.to_record());
    }

    pub fn records(&self) -> Vec<TaskRecord> {
        lock(&self.records).clone()
    }

    /// The most recent record for a task position, if it finished.
    pub fn record_at(&self, position: &str) -> Option<TaskRecord> {
        lock(&self.records)
            .iter()
            .rev()
            .find(|record| record.position == position)
            .cloned()
    }

    // -- Expressions --

    /// Build the object expressions evaluate against.
    ///
    /// Fields of `document` (when it is an object) sit at the top level, so
    /// `x + 1` reads the current document. Reserved keys override them:
    /// `input` (the task input), `context` (workflow variables),
    /// `workflow` (`id`, `name`), `task` (`name`, `position`, `attempt`),
    /// plus every scope variable.
    pub fn expression_context(&self, document: &Value, scope: &Scope, task: &TaskContext) -> Value {
        let mut ctx = match document {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        ctx.insert("input".to_string(), task.input().clone());
        ctx.insert("context".to_string(), self.variables());
        ctx.insert(
            "workflow".to_string(),
            json!({
                "id": self.instance_id.to_string(),
                "name": self.workflow_name,
            }),
        );
        ctx.insert(
            "task".to_string(),
            json!({
                "name": task.name(),
                "position": task.position().to_string(),
                "attempt": task.attempt(),
            }),
        );
        for (name, value) in scope.iter() {
            ctx.insert(name.clone(), value.clone());
        }
        Value::Object(ctx)
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance_id", &self.instance_id)
            .field("workflow_name", &self.workflow_name)
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
