//! Shared fixtures for executor unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use serverflow_types::config::EngineConfig;
use serverflow_types::workflow::TaskDefinition;

use tokio::task::JoinHandle;

use crate::event::{EventConsumer, InMemoryEventBroker};

use super::call::{CallError, CallHandler, CallRequest, CallResponse, UnconfiguredCallHandler};
use super::context::{EngineServices, Scope, WorkflowContext};
use super::error::TaskError;
use super::executor::{ExecutorBuilder, TaskOutcome};
use super::position::WorkflowPosition;

pub fn services() -> Arc<EngineServices> {
    services_with(Arc::new(InMemoryEventBroker::new()), Arc::new(UnconfiguredCallHandler))
}

pub fn services_with(
    broker: Arc<InMemoryEventBroker>,
    call_handler: Arc<dyn CallHandler>,
) -> Arc<EngineServices> {
    Arc::new(EngineServices::new(
        broker.clone(),
        broker,
        call_handler,
        EngineConfig::default(),
    ))
}

/// Build a task from YAML and run it once in a fresh instance.
pub async fn run_task(
    yaml: &str,
    services: Arc<EngineServices>,
    input: Value,
) -> (Arc<WorkflowContext>, Result<TaskOutcome, TaskError>) {
    let def: TaskDefinition = serde_yaml_ng::from_str(yaml).expect("task yaml");
    let executor = ExecutorBuilder::build(&def, WorkflowPosition::root().item("do", 0, &def.name))
        .expect("task builds");
    let wf = Arc::new(WorkflowContext::new("test", services));
    let result = executor.execute(&wf, &Scope::new(), input).await;
    (wf, result)
}

/// Build a task from YAML and run it on a spawned task, returning the
/// instance context so the caller can publish events or cancel.
pub fn spawn_task(
    yaml: &str,
    services: Arc<EngineServices>,
    input: Value,
) -> (Arc<WorkflowContext>, JoinHandle<Result<TaskOutcome, TaskError>>) {
    let def: TaskDefinition = serde_yaml_ng::from_str(yaml).expect("task yaml");
    let executor = ExecutorBuilder::build(&def, WorkflowPosition::root().item("do", 0, &def.name))
        .expect("task builds");
    let wf = Arc::new(WorkflowContext::new("test", services));
    let ctx = Arc::clone(&wf);
    let handle = tokio::spawn(async move { executor.execute(&ctx, &Scope::new(), input).await });
    (wf, handle)
}

/// Yield until the broker holds at least `count` registrations.
pub async fn registrations(broker: &InMemoryEventBroker, count: usize) {
    while broker.active_registrations() < count {
        tokio::task::yield_now().await;
    }
}

/// Call handler answering from a fixed script, recording every request.
#[derive(Default)]
pub struct ScriptedCallHandler {
    script: Mutex<VecDeque<Result<Value, u16>>>,
    pub requests: Mutex<Vec<CallRequest>>,
}

impl ScriptedCallHandler {
    /// `Ok(body)` answers 200 with the body; `Err(status)` fails with that status.
    pub fn new(script: Vec<Result<Value, u16>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl CallHandler for ScriptedCallHandler {
    fn call(
        &self,
        request: CallRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResponse, CallError>> + Send + '_>> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Ok(body)) => Ok(CallResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body,
                }),
                Some(Err(status)) => Err(CallError::new(Some(status), format!("status {status}"))),
                None => Err(CallError::new(None, "script exhausted")),
            }
        })
    }
}
