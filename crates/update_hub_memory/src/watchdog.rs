//! Recording watchdog adapter. Registration is fire-and-forget from the
//! pipeline's perspective; tests fire anomalies back through
//! `UpdatePipeline::handle_anomaly` themselves.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use update_hub_core::ports::{AnomalyWatchdog, Result};

#[derive(Debug, Clone)]
pub struct WatchRegistration {
    pub update_id: Uuid,
    pub targets: BTreeSet<String>,
    pub baseline_metrics: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RecordingWatchdog {
    registrations: RwLock<Vec<WatchRegistration>>,
}

impl RecordingWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn registrations(&self) -> Vec<WatchRegistration> {
        self.registrations.read().await.clone()
    }

    pub async fn registered(&self, update_id: Uuid) -> bool {
        self.registrations
            .read()
            .await
            .iter()
            .any(|r| r.update_id == update_id)
    }
}

#[async_trait]
impl AnomalyWatchdog for RecordingWatchdog {
    async fn register(
        &self,
        update_id: Uuid,
        targets: &BTreeSet<String>,
        baseline_metrics: &serde_json::Value,
    ) -> Result<()> {
        self.registrations.write().await.push(WatchRegistration {
            update_id,
            targets: targets.clone(),
            baseline_metrics: baseline_metrics.clone(),
            at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_records_the_registration() {
        let watchdog = RecordingWatchdog::new();
        let id = Uuid::new_v4();
        let targets: BTreeSet<String> = ["api".to_string()].into_iter().collect();
        watchdog
            .register(id, &targets, &json!({"window": 60}))
            .await
            .unwrap();

        assert!(watchdog.registered(id).await);
        let registrations = watchdog.registrations().await;
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].targets, targets);
    }
}
