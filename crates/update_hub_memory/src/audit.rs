//! Hash-chained in-memory audit log.
//!
//! Sequence numbers are monotonic across all events system-wide, which is
//! what gives the audit trail a global total order independent of any
//! per-update ordering. Each event's hash covers the previous event's hash,
//! so truncation or reordering is detectable. Replays of the same
//! (update_id, event_type) return the original sequence number instead of
//! appending a duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use update_hub_core::canonical;
use update_hub_core::ports::{AuditLog, Result};

/// Hash of "nothing" — chain anchor for the first event.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub sequence: u64,
    pub event_type: String,
    pub update_id: Uuid,
    pub fields: serde_json::Value,
    pub at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events, in sequence order.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Events for one update, in sequence order.
    pub async fn events_for(&self, update_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.update_id == update_id)
            .cloned()
            .collect()
    }

    /// Recompute the chain and compare. False on any tampering.
    pub async fn verify_chain(&self) -> bool {
        let events = self.events.read().await;
        let mut prev_hash = GENESIS_HASH.to_string();
        for (i, event) in events.iter().enumerate() {
            if event.sequence != (i as u64) + 1 || event.prev_hash != prev_hash {
                return false;
            }
            if event.hash != event_hash(event) {
                return false;
            }
            prev_hash = event.hash.clone();
        }
        true
    }
}

fn event_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.prev_hash.as_bytes());
    hasher.update(event.sequence.to_be_bytes());
    hasher.update(event.event_type.as_bytes());
    hasher.update(event.update_id.as_bytes());
    hasher.update(canonical::canonical_json(&event.fields).as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(
        &self,
        event_type: &str,
        update_id: Uuid,
        fields: &serde_json::Value,
    ) -> Result<u64> {
        let mut events = self.events.write().await;

        if let Some(existing) = events
            .iter()
            .find(|e| e.update_id == update_id && e.event_type == event_type)
        {
            return Ok(existing.sequence);
        }

        let sequence = events.len() as u64 + 1;
        let prev_hash = events
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut event = AuditEvent {
            sequence,
            event_type: event_type.to_string(),
            update_id,
            fields: fields.clone(),
            at: Utc::now(),
            prev_hash,
            hash: String::new(),
        };
        event.hash = event_hash(&event);
        events.push(event);

        tracing::debug!(
            sequence,
            event_type,
            update_id = %update_id,
            "Audit: event appended"
        );
        Ok(sequence)
    }
}
