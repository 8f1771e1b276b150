//! Workflow definition model.
//!
//! `WorkflowDefinition` is the immutable, already-parsed shape the engine
//! builds executor trees from. YAML and JSON documents deserialize straight
//! into these types; the engine never sees raw text.
//!
//! Task items are written as a `name` plus exactly one kind key:
//! ```yaml
//! do:
//!   - name: setX
//!     set:
//!       x: 1
//!   - name: waitForOrder
//!     listen:
//!       to:
//!         all:
//!           - with: { type: order.created }
//!           - with: { type: order.paid }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow: metadata, optional data filters and the root task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub document: Document,
    /// Filter applied to the raw instance input before the first task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputFilter>,
    /// Filter applied to the last task's output to produce the instance output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFilter>,
    /// Whole-instance timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<DurationSpec>,
    /// Root task sequence.
    #[serde(rename = "do")]
    pub tasks: Vec<TaskDefinition>,
}

/// Identifying metadata of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

/// `input.from`: a literal document or runtime expression selecting the task input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFilter {
    pub from: Value,
}

/// `output.as` / `export.as`: a literal document or runtime expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFilter {
    #[serde(rename = "as")]
    pub as_: Value,
}

// ---------------------------------------------------------------------------
// Task Definition
// ---------------------------------------------------------------------------

/// One node of the task tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task name, unique among its siblings.
    pub name: String,
    /// Predicate deciding whether the task runs; a skipped task passes its input through.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFilter>,
    /// Writes the evaluated document into the workflow variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<OutputFilter>,
    /// What the enclosing sequence does after this task completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<FlowDirective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<DurationSpec>,
    /// Kind-specific configuration. Exactly one kind key per task item.
    #[serde(flatten)]
    pub config: TaskConfig,
}

impl TaskDefinition {
    /// Create a task with no filters, condition or directive.
    pub fn new(name: impl Into<String>, config: TaskConfig) -> Self {
        Self {
            name: name.into(),
            condition: None,
            input: None,
            output: None,
            export: None,
            then: None,
            timeout: None,
            config,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.config.kind()
    }
}

/// The discriminator of a task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Do,
    Set,
    Call,
    Listen,
    Try,
    Switch,
    For,
    Emit,
    Raise,
    Fork,
    Wait,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Do => "do",
            TaskKind::Set => "set",
            TaskKind::Call => "call",
            TaskKind::Listen => "listen",
            TaskKind::Try => "try",
            TaskKind::Switch => "switch",
            TaskKind::For => "for",
            TaskKind::Emit => "emit",
            TaskKind::Raise => "raise",
            TaskKind::Fork => "fork",
            TaskKind::Wait => "wait",
        };
        f.write_str(s)
    }
}

/// Kind-specific task configuration.
///
/// Externally tagged so that the kind key sits next to the common fields:
/// ```yaml
/// - name: greet
///   set:
///     greeting: "${ 'hello ' + name }"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskConfig {
    /// Ordered sub-task sequence.
    Do(Vec<TaskDefinition>),
    /// Fields merged into the input document.
    Set(serde_json::Map<String, Value>),
    /// Outbound request.
    Call(CallDefinition),
    /// Wait for one or more correlated events.
    Listen(ListenDefinition),
    /// Guarded sequence with catch/retry.
    Try(TryDefinition),
    /// First matching case decides the flow.
    Switch(Vec<SwitchCase>),
    /// Iterate a collection.
    For(ForDefinition),
    /// Publish an event.
    Emit(EmitDefinition),
    /// Fail with a declared error.
    Raise(RaiseDefinition),
    /// Concurrent branches.
    Fork(ForkDefinition),
    /// Suspend for a fixed duration.
    Wait(DurationSpec),
}

impl TaskConfig {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskConfig::Do(_) => TaskKind::Do,
            TaskConfig::Set(_) => TaskKind::Set,
            TaskConfig::Call(_) => TaskKind::Call,
            TaskConfig::Listen(_) => TaskKind::Listen,
            TaskConfig::Try(_) => TaskKind::Try,
            TaskConfig::Switch(_) => TaskKind::Switch,
            TaskConfig::For(_) => TaskKind::For,
            TaskConfig::Emit(_) => TaskKind::Emit,
            TaskConfig::Raise(_) => TaskKind::Raise,
            TaskConfig::Fork(_) => TaskKind::Fork,
            TaskConfig::Wait(_) => TaskKind::Wait,
        }
    }
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

/// Where a sequence goes after a task completes.
///
/// Serialized as a plain string; anything other than the three keywords
/// names a sibling task to jump to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlowDirective {
    Continue,
    /// Leave the enclosing sequence with the current output.
    Exit,
    /// Stop the whole instance with the current output.
    End,
    /// Jump to the named sibling task.
    Goto(String),
}

impl From<String> for FlowDirective {
    fn from(value: String) -> Self {
        match value.as_str() {
            "continue" => FlowDirective::Continue,
            "exit" => FlowDirective::Exit,
            "end" => FlowDirective::End,
            _ => FlowDirective::Goto(value),
        }
    }
}

impl From<FlowDirective> for String {
    fn from(value: FlowDirective) -> Self {
        match value {
            FlowDirective::Continue => "continue".to_string(),
            FlowDirective::Exit => "exit".to_string(),
            FlowDirective::End => "end".to_string(),
            FlowDirective::Goto(name) => name,
        }
    }
}

/// A duration written as a sum of units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationSpec {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hours: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub minutes: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seconds: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub milliseconds: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl DurationSpec {
    pub fn from_millis(milliseconds: u64) -> Self {
        Self {
            milliseconds,
            ..Self::default()
        }
    }

    pub fn from_secs(seconds: u64) -> Self {
        Self {
            seconds,
            ..Self::default()
        }
    }

    /// Total duration; saturates instead of overflowing.
    pub fn to_duration(&self) -> Duration {
        let secs = self
            .seconds
            .saturating_add(self.minutes.saturating_mul(60))
            .saturating_add(self.hours.saturating_mul(3600));
        Duration::from_millis(self.milliseconds).saturating_add(Duration::from_secs(secs))
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Outbound request description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallDefinition {
    #[serde(default = "default_method")]
    pub method: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Request body; may embed runtime expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "get".to_string()
}

// ---------------------------------------------------------------------------
// Listen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenDefinition {
    pub to: EventConsumptionStrategy,
    /// Predicate over the collected events that resolves the wait early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(default)]
    pub read: EventReadMode,
    /// Sub-tasks each arriving event is threaded through before it counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<ListenForEach>,
}

/// How the awaited events jointly resolve a listen task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventConsumptionStrategy {
    /// Every filter must see an event.
    All(Vec<EventFilter>),
    /// The first matching event on any filter resolves the wait.
    Any(Vec<EventFilter>),
    One(EventFilter),
}

impl EventConsumptionStrategy {
    pub fn filters(&self) -> &[EventFilter] {
        match self {
            EventConsumptionStrategy::All(filters) | EventConsumptionStrategy::Any(filters) => {
                filters
            }
            EventConsumptionStrategy::One(filter) => std::slice::from_ref(filter),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, EventConsumptionStrategy::All(_))
    }
}

/// Which part of an arriving event becomes the listen result element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventReadMode {
    /// The event `data` document.
    #[default]
    Data,
    /// The full event envelope (`id`, `type`, `source`, `time`, `data`).
    Envelope,
    /// The event `data` exactly as received; JSON strings are not parsed.
    Raw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenForEach {
    #[serde(rename = "do")]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFilter {
    pub with: EventFilterProperties,
}

impl EventFilter {
    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self {
            with: EventFilterProperties {
                event_type: event_type.into(),
                source: None,
                subject: None,
                data: None,
            },
        }
    }
}

/// Attributes an event must carry to match a filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFilterProperties {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Structural subset the event data must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ---------------------------------------------------------------------------
// Try / Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryDefinition {
    #[serde(rename = "do")]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub catch: CatchDefinition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatchDefinition {
    /// Error type/status the catch applies to. Absent means every error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorFilter>,
    /// Scope variable the caught error is exposed as (default `error`).
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except_when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicyDefinition>,
    /// Tasks run with the caught error when no retry policy is configured.
    #[serde(rename = "do", default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskDefinition>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorFilter {
    pub with: ErrorFilterProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorFilterProperties {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Retry policy as written in a definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicyDefinition {
    /// Maximum number of attempts including the first. Absent means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Base delay between attempts.
    #[serde(default)]
    pub delay: DurationSpec,
    #[serde(default)]
    pub backoff: BackoffDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<JitterDefinition>,
}

/// How the delay grows between attempts.
///
/// ```yaml
/// backoff: constant
/// backoff:
///   exponential: { multiplier: 2.0, max_delay: { seconds: 5 } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffDefinition {
    #[default]
    Constant,
    Linear {
        /// Added per re-attempt; defaults to the base delay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        increment: Option<DurationSpec>,
    },
    Exponential {
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_delay: Option<DurationSpec>,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

/// Bounds of the random offset added to each delay.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct JitterDefinition {
    #[serde(default)]
    pub from: DurationSpec,
    pub to: DurationSpec,
}

// ---------------------------------------------------------------------------
// Switch / For / Fork
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub name: String,
    /// Absent for the default case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub then: FlowDirective,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForDefinition {
    #[serde(rename = "for")]
    pub each: ForEach,
    #[serde(rename = "while", default, skip_serializing_if = "Option::is_none")]
    pub while_: Option<String>,
    #[serde(rename = "do")]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEach {
    /// Scope variable holding the current item.
    #[serde(default = "default_each")]
    pub each: String,
    /// Expression producing the collection to iterate.
    #[serde(rename = "in")]
    pub in_: String,
    /// Scope variable holding the current index.
    #[serde(default = "default_at")]
    pub at: String,
}

fn default_each() -> String {
    "item".to_string()
}

fn default_at() -> String {
    "index".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkDefinition {
    pub branches: Vec<TaskDefinition>,
    /// First branch to complete wins; the others are abandoned.
    #[serde(default)]
    pub compete: bool,
}

// ---------------------------------------------------------------------------
// Emit / Raise
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitDefinition {
    pub event: EventTemplate,
}

/// Event to publish; `data` may embed runtime expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTemplate {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_source() -> String {
    "serverflow".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaiseDefinition {
    pub error: RaiseError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaiseError {
    /// Error type, e.g. `validation` or a custom URI.
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// May be a runtime expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
