//! Task executors: one variant per task kind, arranged as a tree that
//! mirrors the definition.
//!
//! Every node is a `TaskExecutor` carrying the fields common to all tasks
//! (`if`, input/output filters, `export`, `then`, `timeout`) and an
//! `ExecutorKind` with the kind-specific logic. `execute` runs the common
//! pipeline around the kind:
//!
//! 1. fail fast if the instance was cancelled
//! 2. evaluate `if`; a false predicate skips the task and passes the input through
//! 3. apply the input filter
//! 4. run the kind, under the task timeout when one applies
//! 5. apply the output filter, then `export` into the workflow variables
//! 6. record the finished task context on the workflow context
//!
//! Side effects live only in leaves (call, listen, emit, wait). Composite
//! kinds (do, switch, for, try, fork) only orchestrate their children.

pub mod builder;
pub mod control;
pub mod fork;
pub mod leaf;
pub mod listen;
pub mod sequence;
pub mod try_catch;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use serverflow_types::workflow::{FlowDirective, TaskKind};
use tracing::debug;

use super::context::{Scope, TaskContext, WorkflowContext};
use super::error::{TaskError, TaskErrorKind};
use super::position::WorkflowPosition;

pub use builder::ExecutorBuilder;
pub use control::{ForExecutor, SwitchExecutor};
pub use fork::ForkExecutor;
pub use leaf::{CallExecutor, EmitExecutor, RaiseExecutor, SetExecutor, WaitExecutor};
pub use listen::ListenExecutor;
pub use sequence::SequenceExecutor;
pub use try_catch::TryExecutor;

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// Result of a completed task: its output and where the enclosing sequence goes next.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub output: Value,
    pub flow: FlowDirective,
}

impl TaskOutcome {
    /// Output that continues with the next sibling.
    pub fn next(output: Value) -> Self {
        Self {
            output,
            flow: FlowDirective::Continue,
        }
    }

    pub fn with_flow(output: Value, flow: FlowDirective) -> Self {
        Self { output, flow }
    }
}

// ---------------------------------------------------------------------------
// Common configuration
// ---------------------------------------------------------------------------

/// Pre-parsed fields every task kind shares.
#[derive(Debug, Clone, Default)]
pub struct CommonConfig {
    pub condition: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub export: Option<Value>,
    pub then: Option<FlowDirective>,
    pub timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// ExecutorKind
// ---------------------------------------------------------------------------

/// Kind-specific executor logic.
#[derive(Debug)]
pub enum ExecutorKind {
    Sequence(SequenceExecutor),
    Set(SetExecutor),
    Call(CallExecutor),
    Listen(ListenExecutor),
    Try(TryExecutor),
    Switch(SwitchExecutor),
    For(ForExecutor),
    Emit(EmitExecutor),
    Raise(RaiseExecutor),
    Fork(ForkExecutor),
    Wait(WaitExecutor),
}

impl ExecutorKind {
    pub fn kind(&self) -> TaskKind {
        match self {
            ExecutorKind::Sequence(_) => TaskKind::Do,
            ExecutorKind::Set(_) => TaskKind::Set,
            ExecutorKind::Call(_) => TaskKind::Call,
            ExecutorKind::Listen(_) => TaskKind::Listen,
            ExecutorKind::Try(_) => TaskKind::Try,
            ExecutorKind::Switch(_) => TaskKind::Switch,
            ExecutorKind::For(_) => TaskKind::For,
            ExecutorKind::Emit(_) => TaskKind::Emit,
            ExecutorKind::Raise(_) => TaskKind::Raise,
            ExecutorKind::Fork(_) => TaskKind::Fork,
            ExecutorKind::Wait(_) => TaskKind::Wait,
        }
    }

    /// Kinds that suspend on something external and take the configured
    /// default timeout when they declare none.
    fn suspends(&self) -> bool {
        matches!(
            self,
            ExecutorKind::Call(_) | ExecutorKind::Listen(_) | ExecutorKind::Wait(_)
        )
    }

    async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        match self {
            ExecutorKind::Sequence(exec) => exec.run(wf, scope, task.input().clone()).await,
            ExecutorKind::Set(exec) => exec.run(wf, scope, task),
            ExecutorKind::Call(exec) => exec.run(wf, scope, task).await,
            ExecutorKind::Listen(exec) => exec.run(wf, scope, task).await,
            ExecutorKind::Try(exec) => exec.run(wf, scope, task).await,
            ExecutorKind::Switch(exec) => exec.run(wf, scope, task),
            ExecutorKind::For(exec) => exec.run(wf, scope, task).await,
            ExecutorKind::Emit(exec) => exec.run(wf, scope, task),
            ExecutorKind::Raise(exec) => exec.run(wf, scope, task),
            ExecutorKind::Fork(exec) => exec.run(wf, scope, task).await,
            ExecutorKind::Wait(exec) => exec.run(wf, task).await,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

/// One node of the executor tree. Immutable once built and shared across
/// every instance of its definition.
#[derive(Debug)]
pub struct TaskExecutor {
    name: String,
    position: WorkflowPosition,
    common: CommonConfig,
    kind: ExecutorKind,
}

impl TaskExecutor {
    pub fn new(
        name: impl Into<String>,
        position: WorkflowPosition,
        common: CommonConfig,
        kind: ExecutorKind,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            common,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> &WorkflowPosition {
        &self.position
    }

    pub fn kind(&self) -> TaskKind {
        self.kind.kind()
    }

    pub fn executor_kind(&self) -> &ExecutorKind {
        &self.kind
    }

    /// Whether this executor handles definitions of `kind`.
    pub fn accepts(&self, kind: TaskKind) -> bool {
        self.kind.kind() == kind
    }

    /// Run this task once for `input` within instance `wf`.
    pub fn execute<'a>(
        &'a self,
        wf: &'a Arc<WorkflowContext>,
        scope: &'a Scope,
        input: Value,
    ) -> BoxFuture<'a, Result<TaskOutcome, TaskError>> {
        Box::pin(async move {
            if wf.is_cancelled() {
                return Err(TaskError::new(TaskErrorKind::Cancelled, &self.position));
            }

            let mut task = TaskContext::new(self.position.clone(), self.name.clone(), input);

            if let Some(condition) = &self.common.condition {
                let ctx = wf.expression_context(task.input(), scope, &task);
                let should_run = wf
                    .evaluator()
                    .evaluate_bool(condition, &ctx)
                    .map_err(|e| task.error_at(TaskErrorKind::Evaluation(e.to_string())))?;
                if !should_run {
                    debug!(
                        instance_id = %wf.instance_id(),
                        position = %self.position,
                        "task condition false, skipping"
                    );
                    return Ok(TaskOutcome::next(task.input().clone()));
                }
            }

            task.start();
            debug!(
                instance_id = %wf.instance_id(),
                position = %self.position,
                kind = %self.kind(),
                "task started"
            );

            match self.run_filtered(wf, scope, &mut task).await {
                Ok(outcome) => {
                    task.complete(outcome.output.clone());
                    wf.record(&task);
                    debug!(
                        instance_id = %wf.instance_id(),
                        position = %self.position,
                        attempt = task.attempt(),
                        "task completed"
                    );
                    Ok(outcome)
                }
                Err(err) => {
                    task.fail(err.clone());
                    wf.record(&task);
                    debug!(
                        instance_id = %wf.instance_id(),
                        position = %self.position,
                        error = %err,
                        "task failed"
                    );
                    Err(err)
                }
            }
        })
    }

    async fn run_filtered(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let evaluator = *wf.evaluator();
        let evaluation = |task: &TaskContext, e: super::expression::ExpressionError| {
            task.error_at(TaskErrorKind::Evaluation(e.to_string()))
        };

        if let Some(filter) = &self.common.input {
            let ctx = wf.expression_context(task.input(), scope, task);
            let filtered = evaluator.resolve(filter, &ctx).map_err(|e| evaluation(task, e))?;
            task.set_input(filtered);
        }

        let limit = self.common.timeout.or_else(|| {
            self.kind
                .suspends()
                .then(|| wf.config().default_task_timeout())
                .flatten()
        });
        let raw = match limit {
            Some(limit) => tokio::time::timeout(limit, self.kind.run(wf, scope, task))
                .await
                .map_err(|_| task.error_at(TaskErrorKind::Timeout(limit)))??,
            None => self.kind.run(wf, scope, task).await?,
        };

        let mut output = raw.output;
        if let Some(filter) = &self.common.output {
            let output_scope = scope.with("output", output.clone());
            let ctx = wf.expression_context(&output, &output_scope, task);
            output = evaluator.resolve(filter, &ctx).map_err(|e| evaluation(task, e))?;
        }

        if let Some(export) = &self.common.export {
            let export_scope = scope.with("output", output.clone());
            let ctx = wf.expression_context(&output, &export_scope, task);
            let variables = evaluator.resolve(export, &ctx).map_err(|e| evaluation(task, e))?;
            wf.set_variables(variables);
        }

        let flow = match raw.flow {
            FlowDirective::Continue => self.common.then.clone().unwrap_or(FlowDirective::Continue),
            other => other,
        };
        Ok(TaskOutcome::with_flow(output, flow))
    }
}
