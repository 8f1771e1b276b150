//! `try`: run a guarded sequence, catching or retrying its failures.
//!
//! A caught error either triggers another attempt (when a retry policy is
//! declared and allows it) or is handled by `catch.do`. Cancellation is
//! never caught. Uncaught errors propagate without touching the attempt
//! counter.

use std::sync::Arc;

use serverflow_types::workflow::{CatchDefinition, ErrorFilterProperties};
use tracing::warn;

use super::sequence::SequenceExecutor;
use super::TaskOutcome;
use crate::workflow::context::{Scope, TaskContext, WorkflowContext};
use crate::workflow::error::{TaskError, TaskErrorKind};
use crate::workflow::retry::RetryPolicy;

const DEFAULT_ERROR_VARIABLE: &str = "error";

#[derive(Debug)]
pub struct TryExecutor {
    body: SequenceExecutor,
    errors: Option<ErrorFilterProperties>,
    error_variable: String,
    when: Option<String>,
    except_when: Option<String>,
    retry: Option<RetryPolicy>,
    handler: Option<SequenceExecutor>,
}

impl TryExecutor {
    pub fn new(
        body: SequenceExecutor,
        catch: &CatchDefinition,
        retry: Option<RetryPolicy>,
        handler: Option<SequenceExecutor>,
    ) -> Self {
        Self {
            body,
            errors: catch.errors.as_ref().map(|filter| filter.with.clone()),
            error_variable: catch
                .as_
                .clone()
                .unwrap_or_else(|| DEFAULT_ERROR_VARIABLE.to_string()),
            when: catch.when.clone(),
            except_when: catch.except_when.clone(),
            retry,
            handler,
        }
    }

    pub fn body(&self) -> &SequenceExecutor {
        &self.body
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let input = task.input().clone();
        loop {
            let err = match self.body.run(wf, scope, input.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            if err.is_cancelled() || !self.catches(wf, scope, task, &err)? {
                return Err(err);
            }

            let Some(policy) = &self.retry else {
                return self.handle(wf, scope, task, err).await;
            };

            let attempt = task.attempt();
            if !policy.should_retry(attempt) {
                warn!(
                    instance_id = %wf.instance_id(),
                    position = %task.position(),
                    attempts = attempt,
                    error = %err,
                    "retries exhausted"
                );
                return Err(task.error_at(TaskErrorKind::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                }));
            }

            let delay = policy.delay_for(attempt, wf.config().max_retry_delay());
            warn!(
                instance_id = %wf.instance_id(),
                position = %task.position(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            task.mark_retrying();
            tokio::select! {
                biased;
                _ = wf.cancellation_token().cancelled() => {
                    return Err(task.error_at(TaskErrorKind::Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            task.start();
        }
    }

    /// Whether the catch clause applies to `err`.
    fn catches(
        &self,
        wf: &WorkflowContext,
        scope: &Scope,
        task: &TaskContext,
        err: &TaskError,
    ) -> Result<bool, TaskError> {
        if let Some(filter) = &self.errors {
            if filter
                .error_type
                .as_deref()
                .is_some_and(|expected| expected != err.type_name())
            {
                return Ok(false);
            }
            if filter.status.is_some_and(|expected| Some(expected) != err.status()) {
                return Ok(false);
            }
        }
        if self.when.is_none() && self.except_when.is_none() {
            return Ok(true);
        }

        let error_scope = scope.with(self.error_variable.as_str(), err.to_document());
        let ctx = wf.expression_context(task.input(), &error_scope, task);
        let evaluate = |predicate: &str| {
            wf.evaluator()
                .evaluate_bool(predicate, &ctx)
                .map_err(|e| task.error_at(TaskErrorKind::Evaluation(e.to_string())))
        };

        if let Some(when) = &self.when {
            if !evaluate(when)? {
                return Ok(false);
            }
        }
        if let Some(except_when) = &self.except_when {
            if evaluate(except_when)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Handle a caught error without retrying: run `catch.do` over the error
    /// document, or resolve with the try input.
    async fn handle(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &TaskContext,
        err: TaskError,
    ) -> Result<TaskOutcome, TaskError> {
        warn!(
            instance_id = %wf.instance_id(),
            position = %task.position(),
            error = %err,
            "error caught"
        );
        match &self.handler {
            Some(handler) => {
                let document = err.to_document();
                let error_scope = scope.with(self.error_variable.as_str(), document.clone());
                handler.run(wf, &error_scope, document).await
            }
            None => Ok(TaskOutcome::next(task.input().clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
