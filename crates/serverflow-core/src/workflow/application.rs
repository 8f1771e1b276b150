//! `WorkflowApplication`: the entry point that owns the shared services,
//! caches built executor trees, and runs workflow instances.
//!
//! Definitions are keyed by `(namespace, name, version)`; the executor tree
//! for a key is built once and shared by every instance. Each `start`
//! creates a fresh `WorkflowContext`, registers it in the instance table,
//! and spawns the root executor on the configured runtime under a
//! `TaskTracker`. Instances evict themselves from the table when they reach
//! a terminal status.
//!
//! `close` rejects new starts, cancels every live instance, waits for them to
//! drain (bounded by the configured drain timeout) and finally removes any
//! event registration its instances still hold.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use serverflow_types::config::EngineConfig;
use serverflow_types::instance::{InstanceSnapshot, WorkflowStatus};
use serverflow_types::workflow::WorkflowDefinition;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{EventConsumer, EventPublisher, InMemoryEventBroker, ScopedEventConsumer};

use super::call::{CallHandler, UnconfiguredCallHandler};
use super::context::{EngineServices, Scope, WorkflowContext};
use super::error::{BuildError, TaskError, TaskErrorKind};
use super::executor::{ExecutorBuilder, TaskExecutor};
use super::position::WorkflowPosition;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("workflow application is closed")]
    Closed,

    #[error("workflow definition does not build: {0}")]
    Build(#[from] BuildError),

    #[error("no tokio runtime available to run workflow instances")]
    NoRuntime,

    #[error("unknown workflow instance {0}")]
    UnknownInstance(Uuid),

    /// The instance finished with an unrecovered task failure.
    #[error("workflow instance failed: {0}")]
    Instance(#[from] TaskError),
}

// ---------------------------------------------------------------------------
// Definition cache
// ---------------------------------------------------------------------------

/// Identity of a definition in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefinitionKey {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl DefinitionKey {
    pub fn of(definition: &WorkflowDefinition) -> Self {
        Self {
            namespace: definition.document.namespace.clone(),
            name: definition.document.name.clone(),
            version: definition.document.version.clone(),
        }
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.version)
    }
}

/// A definition together with its built executor tree.
#[derive(Debug)]
pub struct WorkflowDefinitionHandle {
    key: DefinitionKey,
    definition: WorkflowDefinition,
    root: Arc<TaskExecutor>,
}

impl WorkflowDefinitionHandle {
    pub fn key(&self) -> &DefinitionKey {
        &self.key
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn root(&self) -> &Arc<TaskExecutor> {
        &self.root
    }
}


// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// Handle to a started instance: its id, live context and eventual output.
pub struct WorkflowInstance {
    id: Uuid,
    context: Arc<WorkflowContext>,
    result: oneshot::Receiver<Result<Value, TaskError>>,
}

impl WorkflowInstance {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.context.status()
    }

    pub fn context(&self) -> &Arc<WorkflowContext> {
        &self.context
    }

    /// Request cancellation of this instance.
    pub fn cancel(&self) -> bool {
        self.context.cancel()
    }

    /// Wait for the instance to finish.
    pub async fn output(self) -> Result<Value, TaskError> {
        self.result.await.unwrap_or_else(|_| {
            Err(TaskError::new(
                TaskErrorKind::runtime("workflow instance was dropped before completing"),
                &WorkflowPosition::root(),
            ))
        })
    }
}

impl fmt::Debug for WorkflowInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowInstance")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a `WorkflowApplication`. Unset collaborators default to a
/// shared `InMemoryEventBroker` and a call handler that rejects every call.
#[derive(Default)]
pub struct WorkflowApplicationBuilder {
    consumer: Option<Arc<dyn EventConsumer>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    call_handler: Option<Arc<dyn CallHandler>>,
    config: EngineConfig,
    runtime: Option<Handle>,
}

impl WorkflowApplicationBuilder {
    /// Use one broker as both consumer and publisher.
    pub fn event_broker(mut self, broker: Arc<InMemoryEventBroker>) -> Self {
        self.consumer = Some(broker.clone());
        self.publisher = Some(broker);
        self
    }

    pub fn event_consumer(mut self, consumer: Arc<dyn EventConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn call_handler(mut self, handler: Arc<dyn CallHandler>) -> Self {
        self.call_handler = Some(handler);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime instances are spawned on. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<WorkflowApplication, ApplicationError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ApplicationError::NoRuntime)?,
        };

        let broker = Arc::new(InMemoryEventBroker::new());
        let shared = self
            .consumer
            .unwrap_or_else(|| broker.clone() as Arc<dyn EventConsumer>);
        let consumer: Arc<dyn EventConsumer> = Arc::new(ScopedEventConsumer::new(shared));
        let publisher = self
            .publisher
            .unwrap_or_else(|| broker as Arc<dyn EventPublisher>);
        let call_handler = self
            .call_handler
            .unwrap_or_else(|| Arc::new(UnconfiguredCallHandler));

        Ok(WorkflowApplication {
            services: Arc::new(EngineServices::new(consumer, publisher, call_handler, self.config)),
            runtime,
            tracker: TaskTracker::new(),
            definitions: DashMap::new(),
            instances: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowApplication
// ---------------------------------------------------------------------------

pub struct WorkflowApplication {
    services: Arc<EngineServices>,
    runtime: Handle,
    tracker: TaskTracker,
    definitions: DashMap<DefinitionKey, Arc<WorkflowDefinitionHandle>>,
    instances: Arc<DashMap<Uuid, Arc<WorkflowContext>>>,
    closed: AtomicBool,
}

impl WorkflowApplication {
    pub fn builder() -> WorkflowApplicationBuilder {
        WorkflowApplicationBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.services.publisher
    }

    pub fn consumer(&self) -> &Arc<dyn EventConsumer> {
        &self.services.consumer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Build (or reuse) the executor tree for a definition.
    ///
    /// The cache is keyed by namespace, name and version only; a changed
    /// definition must carry a new version to be rebuilt.
    pub fn workflow_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinitionHandle>, ApplicationError> {
        let key = DefinitionKey::of(definition);
        if let Some(handle) = self.definitions.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let root = ExecutorBuilder::build_workflow(definition)?;
        debug!(definition = %key, "built executor tree");
        let handle = self
            .definitions
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(WorkflowDefinitionHandle {
                    key,
                    definition: definition.clone(),
                    root,
                })
            })
            .clone();
        Ok(handle)
    }

    /// Start an instance. Returns as soon as the instance is spawned.
    pub fn start(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> Result<WorkflowInstance, ApplicationError> {
        if self.is_closed() {
            return Err(ApplicationError::Closed);
        }
        let handle = self.workflow_definition(definition)?;

        let context = Arc::new(WorkflowContext::new(
            handle.key().name.clone(),
            Arc::clone(&self.services),
        ));
        let id = context.instance_id();
        context.set_status(WorkflowStatus::Running);
        self.instances.insert(id, Arc::clone(&context));
        // `close` may have swapped the flag after the first check; it either
        // saw this entry or we see the flag here.
        if self.is_closed() {
            self.instances.remove(&id);
            return Err(ApplicationError::Closed);
        }
        info!(instance_id = %id, definition = %handle.key(), "workflow instance started");

        let (tx, rx) = oneshot::channel();
        let instances = Arc::clone(&self.instances);
        let ctx = Arc::clone(&context);
        self.tracker.spawn_on(
            async move {
                let scope = Scope::new();
                let result = handle
                    .root()
                    .execute(&ctx, &scope, input)
                    .await
                    .map(|outcome| outcome.output);

                let status = match &result {
                    Ok(_) => WorkflowStatus::Completed,
                    Err(err) if err.is_cancelled() => WorkflowStatus::Cancelled,
                    Err(_) => WorkflowStatus::Faulted,
                };
                ctx.set_status(status);
                instances.remove(&id);

                match &result {
                    Ok(_) => info!(instance_id = %id, %status, "workflow instance finished"),
                    Err(err) => warn!(instance_id = %id, %status, error = %err, "workflow instance finished"),
                }
                // The caller may have dropped its handle.
                let _ = tx.send(result);
            },
            &self.runtime,
        );

        Ok(WorkflowInstance {
            id,
            context,
            result: rx,
        })
    }

    /// Start an instance and wait for its output.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> Result<Value, ApplicationError> {
        let instance = self.start(definition, input)?;
        Ok(instance.output().await?)
    }

    /// Request cancellation of a live instance. `false` if the instance is
    /// unknown, already finished, or was already cancelled.
    pub fn cancel(&self, instance_id: Uuid) -> bool {
        let Some(context) = self
            .instances
            .get(&instance_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return false;
        };
        let first = context.cancel();
        if first {
            info!(%instance_id, "workflow instance cancellation requested");
        }
        first
    }

    /// Status of a live instance.
    pub fn instance_status(&self, instance_id: Uuid) -> Result<WorkflowStatus, ApplicationError> {
        self.instances
            .get(&instance_id)
            .map(|entry| entry.status())
            .ok_or(ApplicationError::UnknownInstance(instance_id))
    }

    /// Snapshot of a live instance's state.
    pub fn snapshot(&self, instance_id: Uuid) -> Result<InstanceSnapshot, ApplicationError> {
        self.instances
            .get(&instance_id)
            .map(|entry| entry.snapshot())
            .ok_or(ApplicationError::UnknownInstance(instance_id))
    }

    /// Ids of every instance that has not reached a terminal status.
    pub fn live_instances(&self) -> Vec<Uuid> {
        self.instances.iter().map(|entry| *entry.key()).collect()
    }

    /// Shut down: reject new starts, cancel live instances, wait for them to
    /// drain, then drop the event registrations this application still holds.
    /// Registrations other applications made on a shared consumer are kept.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let live: Vec<Arc<WorkflowContext>> = self
            .instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for context in &live {
            context.cancel();
        }

        self.tracker.close();
        let drain = self.services.config.shutdown_drain_timeout();
        if tokio::time::timeout(drain, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                drain_ms = drain.as_millis() as u64,
                "instances still running after drain timeout"
            );
        }

        let released = self.services.consumer.unregister_all();
        info!(
            cancelled = live.len(),
            released,
            "workflow application closed"
        );
    }
}

impl fmt::Debug for WorkflowApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowApplication")
            .field("definitions", &self.definitions.len())
            .field("live_instances", &self.instances.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
