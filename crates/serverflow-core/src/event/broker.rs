//! In-process event broker implementing both sides of the event contract.
//!
//! Each registration gets its own unbounded `mpsc` channel. Publishing walks
//! the registration table and sends a clone of the event to every
//! registration whose type and predicate match. Unregistering removes the
//! entry, which drops the sender and closes the receiver side.

use dashmap::DashMap;
use serverflow_types::event::WorkflowEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use super::consumer::{EventConsumer, EventPublisher, Registration, RegistrationBuilder};

struct Subscriber {
    builder: RegistrationBuilder,
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

/// Event broker backed by a concurrent registration table.
///
/// Safe to share behind an `Arc` across instances and worker threads; no
/// caller-side locking is required.
#[derive(Default)]
pub struct InMemoryEventBroker {
    registrations: DashMap<Uuid, Subscriber>,
}

impl InMemoryEventBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventConsumer for InMemoryEventBroker {
    fn subscribe(&self, builder: RegistrationBuilder) -> Registration {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::now_v7();
        let event_type = builder.event_type().to_string();
        self.registrations.insert(id, Subscriber { builder, sender });
        debug!(%id, event_type = event_type.as_str(), "registered event consumer");
        Registration::new(id, event_type, receiver)
    }

    fn unregister(&self, id: Uuid) -> bool {
        let removed = self.registrations.remove(&id).is_some();
        if removed {
            debug!(%id, "unregistered event consumer");
        }
        removed
    }

    fn unregister_all(&self) -> usize {
        let ids: Vec<Uuid> = self.registrations.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }

    fn active_registrations(&self) -> usize {
        self.registrations.len()
    }
}

impl EventPublisher for InMemoryEventBroker {
    fn publish(&self, event: WorkflowEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.registrations.iter() {
            if !entry.builder.matches(&event) {
                continue;
            }
            if entry.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        // Receivers dropped without unregistering; removed after iteration
        // so no shard lock is held while mutating.
        for id in closed {
            self.registrations.remove(&id);
        }

        trace!(
            event_type = event.event_type.as_str(),
            delivered,
            "published event"
        );
        delivered
    }
}

impl std::fmt::Debug for InMemoryEventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBroker")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}
