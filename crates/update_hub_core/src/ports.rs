//! Port traits for the pipeline's external collaborators.
//! Implemented by adapter crates (`update_hub_memory` in-process; real
//! deployments plug in their own) — core logic depends only on these traits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::HubError;
use crate::types::{
    GovernanceDecision, ListFilter, RiskLevel, SignatureEnvelope, StageCommit, UpdateKind,
    UpdateRecord, UpdateStatus, ValidationOutcome,
};

pub type Result<T> = std::result::Result<T, HubError>;

// ── Governance oracle ──────────────────────────────────────────

/// Yes/no/escalate policy oracle. Receives a payload summary, never the full
/// payload.
#[async_trait]
pub trait GovernanceOracle: Send + Sync {
    async fn check(
        &self,
        kind: UpdateKind,
        payload_summary: &str,
        risk_level: RiskLevel,
        created_by: &str,
    ) -> Result<GovernanceDecision>;
}

// ── Signer ─────────────────────────────────────────────────────

/// Cryptographic signing service. Verification is a pure function of
/// (bytes, signature, identity).
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, bytes: &[u8]) -> Result<SignatureEnvelope>;

    async fn verify(&self, bytes: &[u8], signature: &str, identity: &str) -> Result<bool>;
}

// ── Audit log ──────────────────────────────────────────────────

/// Append-only, hash-chained event log. Returns a monotonic sequence number
/// per append and de-duplicates replays by (update_id, event_type),
/// returning the original sequence number. Write-only from this subsystem's
/// perspective.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(
        &self,
        event_type: &str,
        update_id: Uuid,
        fields: &serde_json::Value,
    ) -> Result<u64>;
}

// ── Validators ─────────────────────────────────────────────────

/// Per-kind validator. Depth is risk-scaled: low risk gets structural checks
/// only, medium adds diff/compile checks, high adds a full sandboxed run.
/// The orchestrator enforces the execution bound around this call.
#[async_trait]
pub trait UpdateValidator: Send + Sync {
    async fn validate(
        &self,
        payload: &serde_json::Value,
        risk_level: RiskLevel,
    ) -> Result<ValidationOutcome>;
}

/// Registration table mapping each update kind to its validator. Replaces
/// loose string dispatch: lookups on an unregistered kind are a
/// configuration error, surfaced as such.
#[derive(Clone, Default)]
pub struct ValidatorPool {
    validators: BTreeMap<UpdateKind, Arc<dyn UpdateValidator>>,
}

impl ValidatorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: UpdateKind, validator: Arc<dyn UpdateValidator>) -> Self {
        self.validators.insert(kind, validator);
        self
    }

    pub fn validator_for(&self, kind: UpdateKind) -> Result<Arc<dyn UpdateValidator>> {
        self.validators.get(&kind).cloned().ok_or_else(|| {
            HubError::Infrastructure(format!("no validator registered for kind '{kind}'"))
        })
    }

    /// Kinds without a registered validator. Empty for a complete pool.
    pub fn missing_kinds(&self) -> Vec<UpdateKind> {
        UpdateKind::ALL
            .into_iter()
            .filter(|kind| !self.validators.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for ValidatorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorPool")
            .field("registered", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Distribution bus ───────────────────────────────────────────

/// Topic-based publish primitive with at-least-once delivery. Consumers are
/// expected to be idempotent against repeated delivery of the same
/// update_id; the pipeline does not dedupe on their behalf.
#[async_trait]
pub trait DistributionBus: Send + Sync {
    /// Publish and return the distribution event id.
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<String>;
}

// ── Anomaly watchdog ───────────────────────────────────────────

/// Post-distribution regression observer. Registration is fire-and-forget;
/// the watchdog calls back through the pipeline's `handle_anomaly` entry
/// point.
#[async_trait]
pub trait AnomalyWatchdog: Send + Sync {
    async fn register(
        &self,
        update_id: Uuid,
        targets: &BTreeSet<String>,
        baseline_metrics: &serde_json::Value,
    ) -> Result<()>;
}

// ── Registry store ─────────────────────────────────────────────

/// Durable table of update records. The only shared mutable store in the
/// pipeline; every mutation goes through the atomic `apply`, and reads never
/// observe a partially-written stage transition.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert a new record. Rejects duplicate update_ids.
    async fn insert(&self, record: UpdateRecord) -> Result<()>;

    async fn load(&self, update_id: Uuid) -> Result<UpdateRecord>;

    /// Atomically apply a stage commit and return the updated record.
    /// Implementations must enforce the commit through
    /// [`UpdateRecord::apply_commit`] so transition legality, set-once
    /// fields, and terminal immutability hold everywhere.
    async fn apply(&self, update_id: Uuid, commit: StageCommit) -> Result<UpdateRecord>;

    /// List records matching the filter, ordered by submission time.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<UpdateRecord>>;

    /// Find a live (non-terminal) record with the same kind and payload
    /// checksum. Powers content-addressed submit dedupe.
    async fn find_live(&self, kind: UpdateKind, checksum: &str) -> Result<Option<UpdateRecord>>;

    /// Raw (kind, status, count) tuples for stats aggregation.
    async fn status_counts(&self) -> Result<Vec<(UpdateKind, UpdateStatus, u64)>>;
}
