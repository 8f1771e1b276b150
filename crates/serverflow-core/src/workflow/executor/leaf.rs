//! Leaf executors: `set`, `call`, `emit`, `raise` and `wait`.
//!
//! These are the only kinds (together with `listen`) that touch anything
//! outside the instance. Every suspension point races the instance
//! cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use serverflow_types::event::WorkflowEvent;
use serverflow_types::workflow::{CallDefinition, EventTemplate, RaiseError};
use tracing::debug;

use super::TaskOutcome;
use crate::workflow::call::CallRequest;
use crate::workflow::context::{Scope, TaskContext, WorkflowContext};
use crate::workflow::error::{TaskError, TaskErrorKind};
use crate::workflow::expression::ExpressionError;

fn evaluation(task: &TaskContext) -> impl Fn(ExpressionError) -> TaskError + '_ {
    move |e| task.error_at(TaskErrorKind::Evaluation(e.to_string()))
}

// ---------------------------------------------------------------------------
// set
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SetExecutor {
    fields: Value,
}

impl SetExecutor {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields: Value::Object(fields),
        }
    }

    /// Resolve every field against the input and merge the result into it.
    /// A non-object input is replaced by the resolved fields.
    pub fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let ctx = wf.expression_context(task.input(), scope, task);
        let resolved = wf
            .evaluator()
            .resolve(&self.fields, &ctx)
            .map_err(evaluation(task))?;

        let mut output = match task.input() {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        if let Value::Object(fields) = resolved {
            output.extend(fields);
        }
        Ok(TaskOutcome::next(Value::Object(output)))
    }
}

// ---------------------------------------------------------------------------
// call
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CallExecutor {
    definition: CallDefinition,
}

impl CallExecutor {
    pub fn new(definition: CallDefinition) -> Self {
        Self { definition }
    }

    fn request(
        &self,
        wf: &WorkflowContext,
        scope: &Scope,
        task: &TaskContext,
    ) -> Result<CallRequest, ExpressionError> {
        let ctx = wf.expression_context(task.input(), scope, task);
        let evaluator = wf.evaluator();

        let mut headers = HashMap::with_capacity(self.definition.headers.len());
        for (name, value) in &self.definition.headers {
            headers.insert(name.clone(), evaluator.resolve_string(value, &ctx)?);
        }
        let body = self
            .definition
            .body
            .as_ref()
            .map(|body| evaluator.resolve(body, &ctx))
            .transpose()?;

        Ok(CallRequest {
            method: self.definition.method.to_ascii_lowercase(),
            endpoint: evaluator.resolve_string(&self.definition.endpoint, &ctx)?,
            headers,
            body,
        })
    }

    /// Perform the call; the response body becomes the output.
    pub async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let request = self.request(wf, scope, task).map_err(evaluation(task))?;
        debug!(
            instance_id = %wf.instance_id(),
            method = %request.method,
            endpoint = %request.endpoint,
            attempt = task.attempt(),
            "outbound call"
        );

        let handler = &wf.services().call_handler;
        tokio::select! {
            biased;
            _ = wf.cancellation_token().cancelled() => Err(task.error_at(TaskErrorKind::Cancelled)),
            result = handler.call(request) => match result {
                Ok(response) => Ok(TaskOutcome::next(response.body)),
                Err(e) => Err(task.error_at(TaskErrorKind::Transport {
                    status: e.status,
                    message: e.message,
                })),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// emit
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EmitExecutor {
    template: EventTemplate,
}

impl EmitExecutor {
    pub fn new(template: EventTemplate) -> Self {
        Self { template }
    }

    /// Publish the resolved event and pass the input through.
    pub fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let ctx = wf.expression_context(task.input(), scope, task);
        let evaluator = wf.evaluator();
        let resolve = |text: &str| evaluator.resolve_string(text, &ctx);

        let event_type = resolve(&self.template.event_type).map_err(evaluation(task))?;
        let source = resolve(&self.template.source).map_err(evaluation(task))?;
        let data = match &self.template.data {
            Some(data) => evaluator.resolve(data, &ctx).map_err(evaluation(task))?,
            None => Value::Null,
        };

        let mut event = WorkflowEvent::new(event_type, source, data);
        if let Some(subject) = &self.template.subject {
            event = event.with_subject(resolve(subject).map_err(evaluation(task))?);
        }

        let event_id = event.id;
        let event_type = event.event_type.clone();
        let deliveries = wf.services().publisher.publish(event);
        debug!(
            instance_id = %wf.instance_id(),
            %event_id,
            event_type = %event_type,
            deliveries,
            "event emitted"
        );
        Ok(TaskOutcome::next(task.input().clone()))
    }
}

// ---------------------------------------------------------------------------
// raise
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RaiseExecutor {
    error: RaiseError,
}

impl RaiseExecutor {
    pub fn new(error: RaiseError) -> Self {
        Self { error }
    }

    /// Always fails. Standard type names map onto their error kinds; any
    /// other type is a runtime error carrying the declared fields.
    pub fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let ctx = wf.expression_context(task.input(), scope, task);
        let detail = self
            .error
            .detail
            .as_deref()
            .map(|detail| wf.evaluator().resolve_string(detail, &ctx))
            .transpose()
            .map_err(evaluation(task))?;
        let message = || {
            detail
                .clone()
                .or_else(|| self.error.title.clone())
                .unwrap_or_else(|| "raised".to_string())
        };

        let kind = match self.error.error_type.as_str() {
            "validation" => TaskErrorKind::Validation(message()),
            "expression" => TaskErrorKind::Evaluation(message()),
            "communication" => TaskErrorKind::Transport {
                status: self.error.status,
                message: message(),
            },
            other => TaskErrorKind::Runtime {
                error_type: other.to_string(),
                status: self.error.status,
                title: self.error.title.clone(),
                detail: detail.clone(),
            },
        };
        Err(task.error_at(kind))
    }
}

// ---------------------------------------------------------------------------
// wait
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WaitExecutor {
    duration: Duration,
}

impl WaitExecutor {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        tokio::select! {
            biased;
            _ = wf.cancellation_token().cancelled() => Err(task.error_at(TaskErrorKind::Cancelled)),
            _ = tokio::time::sleep(self.duration) => Ok(TaskOutcome::next(task.input().clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
