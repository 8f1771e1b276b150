//! Workflow engine core: definitions, executor trees, and instance runtime.
//!
//! - `definition` -- YAML/JSON parsing, validation, filesystem load/save
//! - `position` -- JSON-pointer-like task positions
//! - `expression` -- JEXL evaluator for `${ }` expressions, conditions and filters
//! - `context` -- per-instance and per-task execution state
//! - `error` -- task failure classification and build errors
//! - `retry` -- retry policies and backoff computation
//! - `call` -- the outbound call contract
//! - `executor` -- one executor per task kind, built once per definition
//! - `application` -- definition cache and instance lifecycle

pub mod application;
pub mod call;
pub mod context;
pub mod definition;
pub mod error;
pub mod executor;
pub mod expression;
pub mod position;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use application::{
    ApplicationError, DefinitionKey, WorkflowApplication, WorkflowApplicationBuilder,
    WorkflowDefinitionHandle, WorkflowInstance,
};
pub use call::{CallError, CallHandler, CallRequest, CallResponse, UnconfiguredCallHandler};
pub use context::{EngineServices, Scope, TaskContext, WorkflowContext};
pub use error::{BuildError, TaskError, TaskErrorKind};
pub use executor::{ExecutorBuilder, TaskExecutor, TaskOutcome};
pub use position::WorkflowPosition;
