//! Subscribe/unsubscribe contract between listen tasks and an event transport.
//!
//! A listen task asks the consumer for a `RegistrationBuilder` per event
//! filter, applies it to obtain a live `Registration`, and reads matching
//! events from the registration's channel. Unregistering removes the
//! registration and closes its channel.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use serverflow_types::event::WorkflowEvent;
use serverflow_types::workflow::EventFilter;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Extra condition an event must satisfy beyond its type.
pub type EventPredicate = Arc<dyn Fn(&WorkflowEvent) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Source of events for waiting tasks.
///
/// Implementations must be safe to register and unregister from any worker
/// thread concurrently, deliver at least once to every live matching
/// registration, and preserve receipt order per registration.
pub trait EventConsumer: Send + Sync {
    /// Describe a registration for `event_type`, optionally narrowed by a predicate.
    fn register(&self, event_type: &str, predicate: Option<EventPredicate>) -> RegistrationBuilder {
        RegistrationBuilder::new(event_type, predicate)
    }

    /// Make a registration live.
    fn subscribe(&self, builder: RegistrationBuilder) -> Registration;

    /// Remove a registration. Returns `true` if it was live; repeat calls return `false`.
    fn unregister(&self, id: Uuid) -> bool;

    /// Remove every live registration, returning how many were removed.
    fn unregister_all(&self) -> usize;

    fn active_registrations(&self) -> usize;
}

/// Sink for events produced by workflows (`emit`) or external callers.
pub trait EventPublisher: Send + Sync {
    /// Deliver an event, returning the number of registrations it reached.
    fn publish(&self, event: WorkflowEvent) -> usize;
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// A registration that has not been made live yet.
#[derive(Clone)]
pub struct RegistrationBuilder {
    event_type: String,
    predicate: Option<EventPredicate>,
}

impl RegistrationBuilder {
    pub fn new(event_type: impl Into<String>, predicate: Option<EventPredicate>) -> Self {
        Self {
            event_type: event_type.into(),
            predicate,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Whether an event satisfies this registration's type and predicate.
    pub fn matches(&self, event: &WorkflowEvent) -> bool {
        event.event_type == self.event_type
            && self.predicate.as_ref().is_none_or(|predicate| predicate(event))
    }

    /// Subscribe on `consumer`, returning the live handle.
    pub fn apply(self, consumer: &dyn EventConsumer) -> Registration {
        consumer.subscribe(self)
    }
}

impl fmt::Debug for RegistrationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationBuilder")
            .field("event_type", &self.event_type)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// A live registration: its id and the channel matching events arrive on.
#[derive(Debug)]
pub struct Registration {
    id: Uuid,
    event_type: String,
    receiver: mpsc::UnboundedReceiver<WorkflowEvent>,
}

impl Registration {
    pub fn new(
        id: Uuid,
        event_type: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<WorkflowEvent>,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            receiver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Wait for the next event. `None` once the registration is removed.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        self.receiver.recv().await
    }

    pub fn into_receiver(self) -> mpsc::UnboundedReceiver<WorkflowEvent> {
        self.receiver
    }
}

// ---------------------------------------------------------------------------
// RegistrationGuard
// ---------------------------------------------------------------------------

/// Unregisters a set of registrations when released or dropped.
///
/// Owned by a waiting task so that registrations never outlive the wait,
/// including when the wait future itself is dropped (timeouts, fork losers).
pub struct RegistrationGuard {
    consumer: Arc<dyn EventConsumer>,
    ids: Vec<Uuid>,
}

impl RegistrationGuard {
    pub fn new(consumer: Arc<dyn EventConsumer>) -> Self {
        Self {
            consumer,
            ids: Vec::new(),
        }
    }

    pub fn track(&mut self, id: Uuid) {
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Unregister everything tracked so far. Returns how many were still live.
    pub fn release(&mut self) -> usize {
        let released = self
            .ids
            .drain(..)
            .filter(|id| self.consumer.unregister(*id))
            .count();
        if released > 0 {
            debug!(released, "released event registrations");
        }
        released
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Filter matching
// ---------------------------------------------------------------------------

/// Predicate for the non-type attributes of a filter, if it has any.
pub fn filter_predicate(filter: &EventFilter) -> Option<EventPredicate> {
    let props = &filter.with;
    if props.source.is_none() && props.subject.is_none() && props.data.is_none() {
        return None;
    }
    let props = props.clone();
    Some(Arc::new(move |event: &WorkflowEvent| {
        props.source.as_ref().is_none_or(|s| *s == event.source)
            && props
                .subject
                .as_ref()
                .is_none_or(|s| event.subject.as_ref() == Some(s))
            && props
                .data
                .as_ref()
                .is_none_or(|expected| is_subset(expected, &event.data))
    }))
}

/// Whether `expected` is structurally contained in `actual`.
///
/// Objects match when every expected key matches; arrays when every
/// expected element matches the element at the same index; numbers compare
/// by value; anything else by equality.
pub fn is_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => exp
            .iter()
            .all(|(k, v)| act.get(k).is_some_and(|a| is_subset(v, a))),
        (Value::Array(exp), Value::Array(act)) => {
            exp.len() <= act.len() && exp.iter().zip(act).all(|(e, a)| is_subset(e, a))
        }
        (Value::Number(e), Value::Number(a)) => e.as_f64() == a.as_f64(),
        _ => expected == actual,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serverflow_types::workflow::EventFilterProperties;

    fn filter(source: Option<&str>, data: Option<Value>) -> EventFilter {
        EventFilter {
            with: EventFilterProperties {
                event_type: "order.created".to_string(),
                source: source.map(str::to_string),
                subject: None,
                data,
            },
        }
    }

    #[test]
    fn type_only_filter_has_no_predicate() {
        assert!(filter_predicate(&EventFilter::of_type("ping")).is_none());
    }

    #[test]
    fn predicate_checks_source_and_data_subset() {
        let predicate = filter_predicate(&filter(
            Some("shop"),
            Some(json!({ "order": { "status": "paid" } })),
        ))
        .unwrap();

        let matching = WorkflowEvent::new(
            "order.created",
            "shop",
            json!({ "order": { "id": 1, "status": "paid" } }),
        );
        let wrong_source = WorkflowEvent::new(
            "order.created",
            "warehouse",
            json!({ "order": { "status": "paid" } }),
        );
        let wrong_data = WorkflowEvent::new(
            "order.created",
            "shop",
            json!({ "order": { "status": "open" } }),
        );

        assert!(predicate(&matching));
        assert!(!predicate(&wrong_source));
        assert!(!predicate(&wrong_data));
    }

    #[test]
    fn builder_matches_type_then_predicate() {
        let builder = RegistrationBuilder::new(
            "order.created",
            filter_predicate(&filter(Some("shop"), None)),
        );
        assert!(builder.matches(&WorkflowEvent::new("order.created", "shop", json!({}))));
        assert!(!builder.matches(&WorkflowEvent::new("order.paid", "shop", json!({}))));
        assert!(!builder.matches(&WorkflowEvent::new("order.created", "pos", json!({}))));
    }

    #[test]
    fn subset_semantics() {
        assert!(is_subset(&json!({}), &json!({ "a": 1 })));
        assert!(is_subset(&json!({ "a": 1 }), &json!({ "a": 1.0, "b": 2 })));
        assert!(is_subset(&json!([1]), &json!([1, 2])));
        assert!(!is_subset(&json!([2]), &json!([1, 2])));
        assert!(!is_subset(&json!({ "a": 1 }), &json!({ "b": 1 })));
        assert!(!is_subset(&json!("x"), &json!({ "x": 1 })));
    }
}
