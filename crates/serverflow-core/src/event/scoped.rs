//! Application-scoped view of a shared consumer.
//!
//! Several applications may share one broker. Each application talks to it
//! through a `ScopedEventConsumer`, which records the registrations made
//! through it so that `unregister_all` only removes its own.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::debug;
use uuid::Uuid;

use super::consumer::{EventConsumer, EventPredicate, Registration, RegistrationBuilder};

pub struct ScopedEventConsumer {
    inner: Arc<dyn EventConsumer>,
    owned: DashSet<Uuid>,
}

impl ScopedEventConsumer {
    pub fn new(inner: Arc<dyn EventConsumer>) -> Self {
        Self {
            inner,
            owned: DashSet::new(),
        }
    }
}

impl EventConsumer for ScopedEventConsumer {
    fn register(&self, event_type: &str, predicate: Option<EventPredicate>) -> RegistrationBuilder {
        self.inner.register(event_type, predicate)
    }

    fn subscribe(&self, builder: RegistrationBuilder) -> Registration {
        let registration = self.inner.subscribe(builder);
        self.owned.insert(registration.id());
        registration
    }

    fn unregister(&self, id: Uuid) -> bool {
        if self.owned.remove(&id).is_none() {
            return false;
        }
        self.inner.unregister(id)
    }

    fn unregister_all(&self) -> usize {
        let ids: Vec<Uuid> = self.owned.iter().map(|id| *id).collect();
        let released = ids.into_iter().filter(|id| self.unregister(*id)).count();
        debug!(released, "released scoped event registrations");
        released
    }

    fn active_registrations(&self) -> usize {
        self.owned.len()
    }
}

impl std::fmt::Debug for ScopedEventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedEventConsumer")
            .field("owned", &self.owned.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPublisher, InMemoryEventBroker};
    use serde_json::json;
    use serverflow_types::event::WorkflowEvent;

    #[tokio::test]
    async fn unregister_all_leaves_other_scopes_alone() {
        let broker = Arc::new(InMemoryEventBroker::new());
        let first = ScopedEventConsumer::new(broker.clone());
        let second = ScopedEventConsumer::new(broker.clone());

        let _a = first.register("a", None).apply(&first);
        let mut b = second.register("a", None).apply(&second);
        assert_eq!(broker.active_registrations(), 2);

        assert_eq!(first.unregister_all(), 1);
        assert_eq!(first.active_registrations(), 0);
        assert_eq!(second.active_registrations(), 1);

        assert_eq!(broker.publish(WorkflowEvent::new("a", "test", json!({}))), 1);
        assert!(b.recv().await.is_some());
    }

    #[test]
    fn foreign_ids_are_not_unregistered() {
        let broker = Arc::new(InMemoryEventBroker::new());
        let scoped = ScopedEventConsumer::new(broker.clone());
        let outside = broker.register("a", None).apply(broker.as_ref());

        assert!(!scoped.unregister(outside.id()));
        assert_eq!(broker.active_registrations(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let broker = Arc::new(InMemoryEventBroker::new());
        let scoped = ScopedEventConsumer::new(broker.clone());
        let reg = scoped.register("a", None).apply(&scoped);

        assert!(scoped.unregister(reg.id()));
        assert!(!scoped.unregister(reg.id()));
        assert_eq!(broker.active_registrations(), 0);
    }
}
