//! Applied-state index — the last value this pipeline distributed per
//! (kind, component target).
//!
//! The pipeline is the only component permitted to publish update topics, so
//! this index is the authoritative source of "prior value" when packaging
//! derives rollback instructions. It is derivable from the registry by
//! replaying distributed records in order; keeping it in memory just avoids
//! that replay on every packaging call.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use crate::package;
use crate::types::{RollbackStep, UpdateKind, UpdateRecord};

#[derive(Default)]
pub struct AppliedStateIndex {
    inner: RwLock<HashMap<(UpdateKind, String), serde_json::Value>>,
}

impl AppliedStateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value in effect for (kind, target), if any update ever set one.
    pub async fn prior(&self, kind: UpdateKind, target: &str) -> Option<serde_json::Value> {
        let inner = self.inner.read().await;
        inner.get(&(kind, target.to_string())).cloned()
    }

    /// Snapshot of priors for a set of targets, keyed by target.
    pub async fn priors_for<'a, I>(
        &self,
        kind: UpdateKind,
        targets: I,
    ) -> BTreeMap<String, Option<serde_json::Value>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let inner = self.inner.read().await;
        targets
            .into_iter()
            .map(|target| {
                let prior = inner.get(&(kind, target.clone())).cloned();
                (target.clone(), prior)
            })
            .collect()
    }

    /// Record the effect of a distributed update. For a normal update every
    /// component target now carries the payload body; for a rollback record
    /// the instructions are applied (restore sets the prior back, remove
    /// clears the entry).
    pub async fn record_distribution(&self, record: &UpdateRecord) {
        let kind = record.descriptor.kind;
        let mut inner = self.inner.write().await;

        if record.rollback_of.is_some() {
            if let Some(steps) = package::rollback_instructions(&record.descriptor.payload) {
                for (target, step) in steps {
                    match step {
                        RollbackStep::Restore { prior } => {
                            inner.insert((kind, target), prior);
                        }
                        RollbackStep::Remove => {
                            inner.remove(&(kind, target));
                        }
                    }
                }
                return;
            }
            // A rollback record whose payload fails to parse as instructions
            // cannot reach distribution — validation rejects it first.
        }

        for target in &record.descriptor.component_targets {
            inner.insert((kind, target.clone()), record.descriptor.payload.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskLevel, UpdateDescriptor};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn record(
        kind: UpdateKind,
        payload: serde_json::Value,
        targets: &[&str],
        rollback_of: Option<Uuid>,
    ) -> UpdateRecord {
        let descriptor = UpdateDescriptor {
            kind,
            payload,
            component_targets: targets.iter().map(|t| t.to_string()).collect(),
            created_by: "ops".into(),
            risk_level: RiskLevel::Low,
            requested_at: Utc::now(),
        };
        UpdateRecord::new(Uuid::new_v4(), descriptor, rollback_of, Utc::now())
    }

    #[tokio::test]
    async fn distribution_sets_payload_for_every_target() {
        let index = AppliedStateIndex::new();
        let r = record(UpdateKind::Config, json!({"k": 1}), &["a", "b"], None);
        index.record_distribution(&r).await;

        assert_eq!(index.prior(UpdateKind::Config, "a").await, Some(json!({"k": 1})));
        assert_eq!(index.prior(UpdateKind::Config, "b").await, Some(json!({"k": 1})));
        assert_eq!(index.prior(UpdateKind::Config, "c").await, None);
        assert_eq!(index.prior(UpdateKind::Schema, "a").await, None);
    }

    #[tokio::test]
    async fn rollback_restore_puts_prior_value_back() {
        let index = AppliedStateIndex::new();
        index
            .record_distribution(&record(UpdateKind::Config, json!({"k": 1}), &["a"], None))
            .await;
        index
            .record_distribution(&record(UpdateKind::Config, json!({"k": 2}), &["a"], None))
            .await;

        let rollback_payload = json!({"a": {"action": "restore", "prior": {"k": 1}}});
        let rollback = record(UpdateKind::Config, rollback_payload, &["a"], Some(Uuid::new_v4()));
        index.record_distribution(&rollback).await;

        assert_eq!(index.prior(UpdateKind::Config, "a").await, Some(json!({"k": 1})));
    }

    #[tokio::test]
    async fn rollback_remove_clears_the_entry() {
        let index = AppliedStateIndex::new();
        index
            .record_distribution(&record(UpdateKind::Playbook, json!({"steps": []}), &["p"], None))
            .await;

        let rollback_payload = json!({"p": {"action": "remove"}});
        let rollback =
            record(UpdateKind::Playbook, rollback_payload, &["p"], Some(Uuid::new_v4()));
        index.record_distribution(&rollback).await;

        assert_eq!(index.prior(UpdateKind::Playbook, "p").await, None);
    }

    #[tokio::test]
    async fn priors_for_reports_missing_targets_as_none() {
        let index = AppliedStateIndex::new();
        index
            .record_distribution(&record(UpdateKind::Config, json!({"k": 1}), &["a"], None))
            .await;

        let targets = vec!["a".to_string(), "b".to_string()];
        let priors = index.priors_for(UpdateKind::Config, targets.iter()).await;
        assert_eq!(priors["a"], Some(json!({"k": 1})));
        assert_eq!(priors["b"], None);
    }
}
