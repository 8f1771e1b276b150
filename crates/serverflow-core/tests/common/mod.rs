//! Fixtures shared by the whole-workflow scenario tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use serverflow_core::event::{
    EventConsumer, EventPublisher, InMemoryEventBroker, Registration, RegistrationBuilder,
};
use serverflow_core::workflow::{
    CallError, CallHandler, CallRequest, CallResponse, WorkflowApplication,
};
use serverflow_types::event::WorkflowEvent;
use serverflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

pub fn definition(yaml: &str) -> WorkflowDefinition {
    serverflow_core::workflow::definition::parse_workflow_yaml(yaml).expect("valid definition")
}

// ---------------------------------------------------------------------------
// CountingConsumer
// ---------------------------------------------------------------------------

/// Broker wrapper that counts subscriptions and successful unregistrations.
#[derive(Default)]
pub struct CountingConsumer {
    broker: InMemoryEventBroker,
    subscribed: AtomicUsize,
    unregistered: AtomicUsize,
}

impl CountingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribed(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn unregistered(&self) -> usize {
        self.unregistered.load(Ordering::SeqCst)
    }

    /// Yield until at least `count` registrations are live.
    pub async fn wait_for_registrations(&self, count: usize) {
        while self.active_registrations() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Yield until no registration is live. Aborted tasks drop their
    /// registrations on the runtime, not synchronously.
    pub async fn drained(&self) {
        while self.active_registrations() > 0 {
            tokio::task::yield_now().await;
        }
    }

    pub fn publish_data(&self, event_type: &str, data: Value) -> usize {
        self.publish(WorkflowEvent::new(event_type, "tests", data))
    }
}

impl EventConsumer for CountingConsumer {
    fn subscribe(&self, builder: RegistrationBuilder) -> Registration {
        self.subscribed.fetch_add(1, Ordering::SeqCst);
        self.broker.subscribe(builder)
    }

    fn unregister(&self, id: Uuid) -> bool {
        let removed = self.broker.unregister(id);
        if removed {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    fn unregister_all(&self) -> usize {
        let removed = self.broker.unregister_all();
        self.unregistered.fetch_add(removed, Ordering::SeqCst);
        removed
    }

    fn active_registrations(&self) -> usize {
        self.broker.active_registrations()
    }
}

impl EventPublisher for CountingConsumer {
    fn publish(&self, event: WorkflowEvent) -> usize {
        self.broker.publish(event)
    }
}

// ---------------------------------------------------------------------------
// ScriptedCalls
// ---------------------------------------------------------------------------

/// Call handler answering from a fixed script: `Ok(body)` is a 200 response,
/// `Err(status)` a failure with that transport status.
#[derive(Default)]
pub struct ScriptedCalls {
    script: Mutex<VecDeque<Result<Value, u16>>>,
    requests: Mutex<Vec<CallRequest>>,
}

impl ScriptedCalls {
    pub fn new(script: Vec<Result<Value, u16>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CallRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CallHandler for ScriptedCalls {
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

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

pub fn application(events: &Arc<CountingConsumer>, calls: Arc<dyn CallHandler>) -> WorkflowApplication {
    WorkflowApplication::builder()
        .event_consumer(events.clone())
        .event_publisher(events.clone())
        .call_handler(calls)
        .build()
        .expect("application builds inside a runtime")
}
