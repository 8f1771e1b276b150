//! Event envelope delivered to listening workflow instances.
//!
//! `WorkflowEvent` is what publishers hand to the broker and what listen
//! tasks receive. It is Clone + Send + Sync so it can be fanned out to
//! every matching registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An event as seen by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowEvent {
    pub id: Uuid,
    /// Registration key; listen filters match on it first.
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl WorkflowEvent {
    /// Create an event with a fresh id and the current time.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            source: source.into(),
            subject: None,
            time: Utc::now(),
            data,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// The event as a JSON document (`id`, `type`, `source`, `subject`, `time`, `data`).
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_uses_type_key() {
        let event = WorkflowEvent::new("order.created", "shop", json!({"id": 7}))
            .with_subject("order/7");
        let doc = event.to_document();
        assert_eq!(doc["type"], "order.created");
        assert_eq!(doc["source"], "shop");
        assert_eq!(doc["subject"], "order/7");
        assert_eq!(doc["data"]["id"], 7);
        assert!(doc.get("event_type").is_none());
    }

    #[test]
    fn deserializes_without_data() {
        let event: WorkflowEvent = serde_json::from_value(json!({
            "id": Uuid::now_v7(),
            "type": "ping",
            "source": "test",
            "time": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(event.data, Value::Null);
        assert!(event.subject.is_none());
    }
}
