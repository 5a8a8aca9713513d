//! UpdatePipeline — the service facade callers talk to.
//!
//! Holds every external collaborator as an injected `Arc<dyn Port>`; no
//! process-wide singletons. Submission is accepted immediately and processed
//! asynchronously by a per-update owner task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::applied::AppliedStateIndex;
use crate::canonical;
use crate::codes;
use crate::config::PipelineConfig;
use crate::error::HubError;
use crate::metrics;
use crate::orchestrator::PipelineInner;
use crate::package;
use crate::ports::{
    AnomalyWatchdog, AuditLog, DistributionBus, GovernanceOracle, RegistryStore, Result, Signer,
    ValidatorPool,
};
use crate::types::{
    ListFilter, RegistryStats, UpdateDescriptor, UpdateRecord, UpdateStatus, UpdateView,
};

/// The unified update pipeline. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct UpdatePipeline {
    inner: Arc<PipelineInner>,
}

impl UpdatePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        registry: Arc<dyn RegistryStore>,
        governance: Arc<dyn GovernanceOracle>,
        signer: Arc<dyn Signer>,
        audit: Arc<dyn AuditLog>,
        validators: ValidatorPool,
        bus: Arc<dyn DistributionBus>,
        watchdog: Arc<dyn AnomalyWatchdog>,
    ) -> Self {
        let missing = validators.missing_kinds();
        if !missing.is_empty() {
            tracing::warn!(
                missing = ?missing,
                "Pipeline: validator pool is incomplete; updates of these kinds will fail as infrastructure errors"
            );
        }

        Self {
            inner: Arc::new(PipelineInner {
                config,
                registry,
                governance,
                signer,
                audit,
                validators,
                bus,
                watchdog,
                applied: AppliedStateIndex::new(),
                pending_approvals: Mutex::new(HashMap::new()),
                running: Mutex::new(HashSet::new()),
                rollbacks_in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    // ── submit ────────────────────────────────────────────────

    /// Accept an update descriptor and start processing it asynchronously.
    ///
    /// Content-addressed idempotent: resubmitting a descriptor whose
    /// (kind, payload) matches a live record returns the existing update_id
    /// instead of creating a duplicate.
    pub async fn submit(&self, descriptor: UpdateDescriptor) -> Result<Uuid> {
        if descriptor.created_by.trim().is_empty() {
            return Err(HubError::InvalidInput(
                "created_by must not be empty".to_string(),
            ));
        }
        if descriptor.component_targets.is_empty() {
            return Err(HubError::InvalidInput(format!(
                "[{}] descriptor declares no component targets",
                codes::PKG_TARGETS_EMPTY
            )));
        }
        if descriptor.payload.is_null() {
            return Err(HubError::InvalidInput(
                "payload must not be null".to_string(),
            ));
        }

        let checksum = canonical::payload_checksum(&descriptor.payload);
        if let Some(existing) = self
            .inner
            .registry
            .find_live(descriptor.kind, &checksum)
            .await?
        {
            metrics::emit_submitted(
                existing.update_id,
                descriptor.kind,
                descriptor.risk_level,
                true,
            );
            return Ok(existing.update_id);
        }

        let update_id = Uuid::new_v4();
        let kind = descriptor.kind;
        let risk = descriptor.risk_level;
        let record = UpdateRecord::new(update_id, descriptor, None, Utc::now());
        self.inner.registry.insert(record).await?;
        metrics::emit_submitted(update_id, kind, risk, false);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_update(update_id));

        Ok(update_id)
    }

    // ── reads ─────────────────────────────────────────────────

    /// Read-only projection of the record's true current state, including
    /// FailedInfrastructure with its retry count.
    pub async fn get_status(&self, update_id: Uuid) -> Result<UpdateView> {
        Ok(self.inner.registry.load(update_id).await?.view())
    }

    pub async fn list_updates(&self, filter: &ListFilter) -> Result<Vec<UpdateView>> {
        let records = self.inner.registry.list(filter).await?;
        Ok(records.iter().map(UpdateRecord::view).collect())
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        let counts = self.inner.registry.status_counts().await?;
        Ok(RegistryStats::from_counts(&counts))
    }

    // ── rollback ──────────────────────────────────────────────

    /// Create a rollback update for a watched record. The new record flows
    /// through the entire pipeline (governance and validation included);
    /// only once it distributes does the original flip to RolledBack.
    pub async fn request_rollback(&self, update_id: Uuid, reason: &str) -> Result<Uuid> {
        self.start_rollback(update_id, reason, codes::WD_ROLLBACK_REQUESTED, "operator")
            .await
    }

    /// Inbound watchdog callback. Idempotent against repeated anomaly
    /// signals for the same update: returns the existing rollback id.
    pub async fn handle_anomaly(
        &self,
        update_id: Uuid,
        evidence: &serde_json::Value,
    ) -> Result<Uuid> {
        let record = self.inner.registry.load(update_id).await?;
        if let Some(existing) = record.rolled_back_by {
            return Ok(existing);
        }

        let _ = self
            .inner
            .audit
            .append(codes::EVENT_ANOMALY, update_id, evidence)
            .await;

        let reason = format!(
            "anomaly reported: {}",
            canonical::payload_summary(evidence, 256)
        );
        self.start_rollback(
            update_id,
            &reason,
            codes::WD_ANOMALY_TRIGGERED,
            "anomaly_watchdog",
        )
        .await
    }

    async fn start_rollback(
        &self,
        update_id: Uuid,
        reason: &str,
        code: &str,
        requested_by: &str,
    ) -> Result<Uuid> {
        let original = self.inner.registry.load(update_id).await?;

        if original.status != UpdateStatus::Watched {
            return Err(HubError::Conflict(format!(
                "update {update_id} is {} — only watched updates can be rolled back",
                original.status
            )));
        }
        if let Some(by) = original.rolled_back_by {
            return Err(HubError::Conflict(format!(
                "update {update_id} was already rolled back by {by}"
            )));
        }
        {
            let mut in_flight = self.inner.rollbacks_in_flight.lock().await;
            if !in_flight.insert(update_id) {
                return Err(HubError::Conflict(format!(
                    "a rollback of update {update_id} is already in flight"
                )));
            }
        }

        let descriptor = match package::rollback_descriptor(&original, requested_by, Utc::now()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.inner.rollbacks_in_flight.lock().await.remove(&update_id);
                return Err(e);
            }
        };

        let rollback_id = Uuid::new_v4();
        let record = UpdateRecord::new(rollback_id, descriptor, Some(update_id), Utc::now());
        if let Err(e) = self.inner.registry.insert(record).await {
            self.inner.rollbacks_in_flight.lock().await.remove(&update_id);
            return Err(e);
        }
        metrics::emit_rollback_requested(update_id, rollback_id, code, reason);

        // The request itself goes on the trail; a flaky audit log must not
        // block an emergency rollback.
        let fields = serde_json::json!({
            "rollback_id": rollback_id,
            "code": code,
            "reason": reason,
            "requested_by": requested_by,
        });
        let _ = self
            .inner
            .audit
            .append(codes::EVENT_ROLLBACK_REQUESTED, update_id, &fields)
            .await;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_update(rollback_id));

        Ok(rollback_id)
    }

    // ── approvals ─────────────────────────────────────────────

    /// Mark a pending high-risk conditional approval as resolved, waking the
    /// suspended pipeline run.
    pub async fn resolve_approval(&self, update_id: Uuid, approval_ref: &str) -> Result<()> {
        self.inner.resolve_approval(update_id, approval_ref).await
    }

    /// Abort a pending approval wait; the record transitions to Rejected.
    pub async fn abort_pending(&self, update_id: Uuid, reason: &str) -> Result<()> {
        self.inner.abort_pending(update_id, reason).await
    }

    // ── verification ──────────────────────────────────────────

    /// Independently verify a record's package checksum and signature from
    /// its persisted state — no orchestrator runtime trusted.
    pub async fn verify_package(&self, update_id: Uuid) -> Result<bool> {
        let record = self.inner.registry.load(update_id).await?;
        let package = record.package.as_ref().ok_or_else(|| {
            HubError::Conflict(format!("update {update_id} has not been packaged"))
        })?;

        if !package::verify_checksum(&record.descriptor, package) {
            return Ok(false);
        }

        let (signature, decision) = match (&record.signature, &record.governance_decision) {
            (Some(signature), Some(decision)) => (signature, decision),
            _ => return Ok(false),
        };
        let bytes = canonical::sign_bytes(&record.descriptor, decision)?;
        self.inner
            .signer
            .verify(&bytes, &signature.signature, &signature.identity)
            .await
    }

    // ── test/ops support ──────────────────────────────────────

    /// Poll until the update settles: a terminal state, the Watched resting
    /// state, or an observable approval suspension.
    pub async fn await_settled(&self, update_id: Uuid, timeout: Duration) -> Result<UpdateView> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.inner.registry.load(update_id).await?;
            let settled = record.status.is_terminal()
                || record.status == UpdateStatus::Watched
                || record.pending_approval.is_some();
            if settled {
                return Ok(record.view());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HubError::Conflict(format!(
                    "update {update_id} still {} after {timeout:?}",
                    record.status
                )));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
