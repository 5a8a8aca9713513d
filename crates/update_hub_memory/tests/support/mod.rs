//! Shared fixtures for the pipeline integration suites.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;

use update_hub_core::canonical;
use update_hub_core::ports::GovernanceOracle;
use update_hub_core::types::{RiskLevel, RollbackStep, UpdateDescriptor, UpdateKind};
use update_hub_core::{PipelineConfig, UpdatePipeline, ValidatorPool};
use update_hub_memory::{
    standard_pool, InMemoryAuditLog, InMemoryBus, InMemoryRegistry, KeyedSigner,
    PolicyTableOracle, RecordingWatchdog,
};

pub const SETTLE: Duration = Duration::from_secs(5);

pub struct TestHub {
    pub pipeline: UpdatePipeline,
    pub registry: Arc<InMemoryRegistry>,
    pub audit: Arc<InMemoryAuditLog>,
    pub bus: Arc<InMemoryBus>,
    pub watchdog: Arc<RecordingWatchdog>,
}

/// Config tuned for tests: real semantics, millisecond backoff.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(5),
        ..PipelineConfig::default()
    }
}

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test ...`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn build_hub(
    config: PipelineConfig,
    oracle: Arc<dyn GovernanceOracle>,
    validators: ValidatorPool,
) -> TestHub {
    init_tracing();
    let registry = Arc::new(InMemoryRegistry::new());
    let audit = Arc::new(InMemoryAuditLog::new());
    let bus = Arc::new(InMemoryBus::new());
    let watchdog = Arc::new(RecordingWatchdog::new());
    let signer = Arc::new(KeyedSigner::new(b"test-signing-key".to_vec(), "signer-test"));

    let pipeline = UpdatePipeline::new(
        config,
        registry.clone(),
        oracle,
        signer,
        audit.clone(),
        validators,
        bus.clone(),
        watchdog.clone(),
    );

    TestHub {
        pipeline,
        registry,
        audit,
        bus,
        watchdog,
    }
}

pub fn default_hub() -> TestHub {
    build_hub(
        fast_config(),
        Arc::new(PolicyTableOracle::new()),
        standard_pool(),
    )
}

pub fn descriptor(
    kind: UpdateKind,
    payload: serde_json::Value,
    targets: &[&str],
    risk: RiskLevel,
) -> UpdateDescriptor {
    UpdateDescriptor {
        kind,
        payload,
        component_targets: targets.iter().map(|t| t.to_string()).collect(),
        created_by: "ops".to_string(),
        risk_level: risk,
        requested_at: Utc::now(),
    }
}

pub fn config_descriptor(payload: serde_json::Value, targets: &[&str]) -> UpdateDescriptor {
    descriptor(UpdateKind::Config, payload, targets, RiskLevel::Low)
}

// ── Fake consumer ──────────────────────────────────────────────

/// A consumer applying distribution events to a per-target state map —
/// what a cache or schema-driven store would do with the topic stream.
/// Idempotent against repeated delivery by construction (applying the same
/// event twice is a no-op on the final state).
pub struct FakeConsumer {
    state: Arc<RwLock<BTreeMap<String, serde_json::Value>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeConsumer {
    pub async fn attach(bus: &InMemoryBus, topic: &str) -> Self {
        let mut rx = bus.subscribe(topic).await;
        let state: Arc<RwLock<BTreeMap<String, serde_json::Value>>> =
            Arc::new(RwLock::new(BTreeMap::new()));
        let applied = state.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let payload = event.payload.get("payload").cloned().unwrap_or(json!(null));
                let is_rollback = event
                    .payload
                    .get("rollback_of")
                    .map(|r| !r.is_null())
                    .unwrap_or(false);

                let mut state = applied.write().await;
                if is_rollback {
                    let steps: BTreeMap<String, RollbackStep> =
                        serde_json::from_value(payload).unwrap_or_default();
                    for (target, step) in steps {
                        match step {
                            RollbackStep::Restore { prior } => {
                                state.insert(target, prior);
                            }
                            RollbackStep::Remove => {
                                state.remove(&target);
                            }
                        }
                    }
                } else if let Some(targets) = event
                    .payload
                    .get("component_targets")
                    .and_then(|t| t.as_array())
                {
                    for target in targets {
                        if let Some(target) = target.as_str() {
                            state.insert(target.to_string(), payload.clone());
                        }
                    }
                }
            }
        });

        Self { state, handle }
    }

    /// Canonical rendering of the consumer's state — the byte-equivalence
    /// anchor for the rollback round-trip law.
    pub async fn state_bytes(&self) -> String {
        let state = self.state.read().await;
        let value = serde_json::to_value(&*state).expect("state serializes");
        canonical::canonical_json(&value)
    }

    pub async fn state_of(&self, target: &str) -> Option<serde_json::Value> {
        self.state.read().await.get(target).cloned()
    }
}

impl Drop for FakeConsumer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Yield until the consumer task has drained pending events.
pub async fn drain() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
