//! In-memory registry store. Every mutation goes through the core
//! `apply_commit` path, so transition legality, set-once fields, and
//! terminal immutability are enforced identically to any other store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use update_hub_core::ports::{RegistryStore, Result};
use update_hub_core::types::{ListFilter, StageCommit, UpdateKind, UpdateRecord, UpdateStatus};
use update_hub_core::HubError;

#[derive(Default)]
pub struct InMemoryRegistry {
    records: RwLock<HashMap<Uuid, UpdateRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records. Test convenience.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn insert(&self, record: UpdateRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.update_id) {
            return Err(HubError::Conflict(format!(
                "update {} already exists",
                record.update_id
            )));
        }
        records.insert(record.update_id, record);
        Ok(())
    }

    async fn load(&self, update_id: Uuid) -> Result<UpdateRecord> {
        let records = self.records.read().await;
        records
            .get(&update_id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("update {update_id}")))
    }

    async fn apply(&self, update_id: Uuid, commit: StageCommit) -> Result<UpdateRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&update_id)
            .ok_or_else(|| HubError::NotFound(format!("update {update_id}")))?;

        // Validate against a scratch copy so a failed commit leaves the
        // stored record untouched and readers never see a partial write.
        let mut updated = record.clone();
        updated.apply_commit(commit)?;
        *record = updated.clone();
        Ok(updated)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<UpdateRecord>> {
        let records = self.records.read().await;
        let mut matched: Vec<UpdateRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.descriptor
                .requested_at
                .cmp(&b.descriptor.requested_at)
                .then_with(|| a.update_id.cmp(&b.update_id))
        });
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn find_live(&self, kind: UpdateKind, checksum: &str) -> Result<Option<UpdateRecord>> {
        let records = self.records.read().await;
        let mut live: Vec<&UpdateRecord> = records
            .values()
            .filter(|r| {
                r.descriptor.kind == kind
                    && r.payload_checksum == checksum
                    && !r.status.is_terminal()
            })
            .collect();
        live.sort_by_key(|r| r.descriptor.requested_at);
        Ok(live.first().map(|r| (*r).clone()))
    }

    async fn status_counts(&self) -> Result<Vec<(UpdateKind, UpdateStatus, u64)>> {
        let records = self.records.read().await;
        let mut counts: HashMap<(UpdateKind, UpdateStatus), u64> = HashMap::new();
        for record in records.values() {
            *counts
                .entry((record.descriptor.kind, record.status))
                .or_default() += 1;
        }
        let mut out: Vec<(UpdateKind, UpdateStatus, u64)> = counts
            .into_iter()
            .map(|((kind, status), count)| (kind, status, count))
            .collect();
        out.sort();
        Ok(out)
    }
}
