//! In-memory distribution bus. Topic-keyed fan-out over unbounded channels
//! plus a journal of everything published, so tests can assert exactly what
//! went out (and that nothing did).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use update_hub_core::ports::{DistributionBus, Result};

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryBus {
    journal: RwLock<Vec<PublishedEvent>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<PublishedEvent>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic. Delivery is at-least-once from the publisher's
    /// perspective; subscribers dedupe by update_id if they care.
    pub async fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<PublishedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Everything ever published, in publish order.
    pub async fn journal(&self) -> Vec<PublishedEvent> {
        self.journal.read().await.clone()
    }

    /// Published events on one topic.
    pub async fn published_on(&self, topic: &str) -> Vec<PublishedEvent> {
        self.journal
            .read()
            .await
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DistributionBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<String> {
        let event = PublishedEvent {
            event_id: format!("evt-{}", Uuid::new_v4()),
            topic: topic.to_string(),
            payload: payload.clone(),
            at: Utc::now(),
        };

        self.journal.write().await.push(event.clone());

        let subscribers = self.subscribers.read().await;
        let fanout = subscribers.get(topic).map(|s| s.len()).unwrap_or(0);
        if let Some(senders) = subscribers.get(topic) {
            for sender in senders {
                // A dropped subscriber is not a publish failure.
                let _ = sender.send(event.clone());
            }
        }

        tracing::debug!(
            topic,
            event_id = %event.event_id,
            subscribers = fanout,
            "Bus: event published"
        );
        Ok(event.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_returns_event_id_and_journals() {
        let bus = InMemoryBus::new();
        let id = bus.publish("update.config", &json!({"k": 1})).await.unwrap();
        assert!(id.starts_with("evt-"));
        let journal = bus.journal().await;
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].topic, "update.config");
    }

    #[tokio::test]
    async fn subscribers_receive_topic_events_only() {
        let bus = InMemoryBus::new();
        let mut rx = bus.subscribe("update.schema").await;
        bus.publish("update.config", &json!({"k": 1})).await.unwrap();
        bus.publish("update.schema", &json!({"s": 2})).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "update.schema");
        assert!(rx.try_recv().is_err(), "config event must not arrive here");
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_fail_publish() {
        let bus = InMemoryBus::new();
        let rx = bus.subscribe("update.config").await;
        drop(rx);
        assert!(bus.publish("update.config", &json!({})).await.is_ok());
    }
}
