//! `listen`: wait for correlated events with AND (`to.all`) or OR
//! (`to.any`, `to.one`) semantics.
//!
//! One registration is made per filter, all up front, and the receivers are
//! merged into a single stream owned by the combinator loop. Every
//! registration is released when the wait resolves; a `RegistrationGuard`
//! covers failure, cancellation and the future being dropped.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use serverflow_types::event::WorkflowEvent;
use serverflow_types::workflow::{EventFilter, EventReadMode, ListenDefinition};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::sequence::SequenceExecutor;
use super::TaskOutcome;
use crate::event::consumer::filter_predicate;
use crate::event::RegistrationGuard;
use crate::workflow::context::{Scope, TaskContext, WorkflowContext};
use crate::workflow::error::{TaskError, TaskErrorKind};

#[derive(Debug)]
pub struct ListenExecutor {
    filters: Vec<EventFilter>,
    all: bool,
    until: Option<String>,
    read: EventReadMode,
    foreach: Option<SequenceExecutor>,
}

impl ListenExecutor {
    pub fn new(definition: &ListenDefinition, foreach: Option<SequenceExecutor>) -> Self {
        Self {
            filters: definition.to.filters().to_vec(),
            all: definition.to.is_all(),
            until: definition.until.clone(),
            read: definition.read,
            foreach,
        }
    }

    pub fn filters(&self) -> &[EventFilter] {
        &self.filters
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let consumer = Arc::clone(&wf.services().consumer);
        let mut guard = RegistrationGuard::new(Arc::clone(&consumer));
        let mut receivers = Vec::with_capacity(self.filters.len());
        for (index, filter) in self.filters.iter().enumerate() {
            let registration = consumer
                .register(&filter.with.event_type, filter_predicate(filter))
                .apply(consumer.as_ref());
            guard.track(registration.id());
            receivers.push(
                UnboundedReceiverStream::new(registration.into_receiver())
                    .map(move |event| (index, event))
                    .boxed(),
            );
        }
        let mut arrivals = stream::select_all(receivers);

        debug!(
            instance_id = %wf.instance_id(),
            position = %task.position(),
            registrations = guard.len(),
            mode = if self.all { "all" } else { "any" },
            "listening for events"
        );

        let mut satisfied = vec![false; self.filters.len()];
        let mut collected = Vec::new();
        loop {
            let (index, event) = tokio::select! {
                biased;
                _ = wf.cancellation_token().cancelled() => {
                    return Err(task.error_at(TaskErrorKind::Cancelled));
                }
                next = arrivals.next() => match next {
                    Some(arrival) => arrival,
                    None => {
                        return Err(task.error_at(TaskErrorKind::Transport {
                            status: None,
                            message: "event stream closed".to_string(),
                        }));
                    }
                },
            };

            if self.all && satisfied[index] {
                debug!(
                    instance_id = %wf.instance_id(),
                    event_id = %event.id,
                    filter = index,
                    "duplicate arrival for satisfied filter ignored"
                );
                continue;
            }

            let item = self.consume(wf, scope, &event, collected.len()).await?;
            if self.all {
                satisfied[index] = true;
                collected.push(item);
                if satisfied.iter().all(|s| *s) || self.until_holds(wf, scope, task, &collected)? {
                    break;
                }
            } else {
                let candidate = vec![item];
                if self.until.is_none() || self.until_holds(wf, scope, task, &candidate)? {
                    collected = candidate;
                    break;
                }
            }
        }

        let released = guard.release();
        debug!(
            instance_id = %wf.instance_id(),
            position = %task.position(),
            events = collected.len(),
            released,
            "listen resolved"
        );
        Ok(TaskOutcome::next(Value::Array(collected)))
    }

    /// Convert an arrival per `read` and thread it through `foreach`.
    async fn consume(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        event: &WorkflowEvent,
        index: usize,
    ) -> Result<Value, TaskError> {
        let item = read_event(event, self.read);
        match &self.foreach {
            Some(body) => {
                let item_scope = scope.with("item", item.clone()).with("index", json!(index));
                let outcome = body.run(wf, &item_scope, item).await?;
                Ok(outcome.output)
            }
            None => Ok(item),
        }
    }

    /// Whether `until` holds over `events`. Absent `until` never resolves early.
    fn until_holds(
        &self,
        wf: &WorkflowContext,
        scope: &Scope,
        task: &TaskContext,
        events: &[Value],
    ) -> Result<bool, TaskError> {
        let Some(until) = &self.until else {
            return Ok(false);
        };
        let events = Value::Array(events.to_vec());
        let ctx = wf.expression_context(&events, &scope.with("events", events.clone()), task);
        wf.evaluator()
            .evaluate_bool(until, &ctx)
            .map_err(|e| task.error_at(TaskErrorKind::Evaluation(e.to_string())))
    }
}

/// Shape an event for the task output.
fn read_event(event: &WorkflowEvent, mode: EventReadMode) -> Value {
    match mode {
        EventReadMode::Data => match &event.data {
            Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| event.data.clone()),
            data => data.clone(),
        },
        EventReadMode::Envelope => event.to_document(),
        EventReadMode::Raw => event.data.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
