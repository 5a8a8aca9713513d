//! Stage orchestration — drives every update through the 8 ordered stages.
//!
//! | Stage | Commit status      | External call        | Failure routing        |
//! |-------|--------------------|----------------------|------------------------|
//! | 1     | GovernanceChecked  | oracle check         | deny → Rejected        |
//! | 2     | Signed             | signer               | infra retry            |
//! | 3     | LoggedProposed     | audit append         | infra retry            |
//! | 4     | Validated          | validator (bounded)  | fail/timeout → Rejected|
//! | 5     | Packaged           | — (pure)             | —                      |
//! | 6     | Distributed        | bus publish          | infra retry            |
//! | 7     | LoggedComplete     | audit append         | infra retry            |
//! | 8     | Watched            | watchdog register    | infra retry            |
//!
//! One spawned task owns the full sequence for its update_id, so two stage
//! advances for the same record can never interleave. Stage results are
//! explicit tagged outcomes — policy rejection and infrastructure failure
//! are different types, not differently-shaped exceptions.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::applied::AppliedStateIndex;
use crate::canonical;
use crate::codes;
use crate::config::PipelineConfig;
use crate::error::HubError;
use crate::metrics;
use crate::package;
use crate::ports::{
    AnomalyWatchdog, AuditLog, DistributionBus, GovernanceOracle, RegistryStore, Result, Signer,
    ValidatorPool,
};
use crate::types::{
    Diagnostic, FailureInfo, GovernanceVerdict, RiskLevel, StageCommit, UpdateRecord, UpdateStatus,
    ValidationOutcome,
};

/// Longest payload rendering handed to the governance oracle.
const PAYLOAD_SUMMARY_MAX: usize = 512;

/// Wakeup signal delivered to a suspended high-risk conditional approval.
pub(crate) enum ApprovalSignal {
    Resolved,
    Aborted { reason: String },
}

/// Outcome of a stage-level retried call.
pub(crate) enum RetryResult<T> {
    Ok(T),
    Exhausted { attempts: u32, last_error: String },
    Fatal(HubError),
}

/// Retry an external call with bounded exponential backoff. Only
/// infrastructure errors are retried; anything else is fatal to the run.
pub(crate) async fn retry_stage<T, F, Fut>(
    config: &PipelineConfig,
    update_id: Uuid,
    stage: &str,
    mut call: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return RetryResult::Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                metrics::emit_retry(update_id, stage, attempt, &e.to_string());
                tokio::time::sleep(config.backoff_delay(attempt)).await;
            }
            Err(e) if e.is_retryable() => {
                return RetryResult::Exhausted {
                    attempts: attempt,
                    last_error: e.to_string(),
                }
            }
            Err(e) => return RetryResult::Fatal(e),
        }
    }
}

/// Whether a stage handed control onward or halted the run (the halt commit
/// has already been persisted).
enum Flow {
    Continue(UpdateRecord),
    Halted,
}

/// Shared pipeline state behind the service facade. All mutation of update
/// records flows through `registry.apply`.
pub(crate) struct PipelineInner {
    pub(crate) config: PipelineConfig,
    pub(crate) registry: Arc<dyn RegistryStore>,
    pub(crate) governance: Arc<dyn GovernanceOracle>,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) audit: Arc<dyn AuditLog>,
    pub(crate) validators: ValidatorPool,
    pub(crate) bus: Arc<dyn DistributionBus>,
    pub(crate) watchdog: Arc<dyn AnomalyWatchdog>,
    pub(crate) applied: AppliedStateIndex,
    pub(crate) pending_approvals: Mutex<HashMap<Uuid, oneshot::Sender<ApprovalSignal>>>,
    pub(crate) running: Mutex<HashSet<Uuid>>,
    /// Originals with a rollback record currently in flight.
    pub(crate) rollbacks_in_flight: Mutex<HashSet<Uuid>>,
}

impl PipelineInner {
    /// Drive one update through its stage sequence. Sole owner of the
    /// record's lifecycle while it runs.
    pub(crate) async fn run_update(self: Arc<Self>, update_id: Uuid) {
        {
            let mut running = self.running.lock().await;
            if !running.insert(update_id) {
                tracing::warn!(
                    update_id = %update_id,
                    "Pipeline: update already owned by a running task"
                );
                return;
            }
        }

        if let Err(e) = self.drive(update_id).await {
            tracing::error!(
                update_id = %update_id,
                error = %e,
                "Pipeline: run aborted on internal error"
            );
        }

        self.running.lock().await.remove(&update_id);
        self.pending_approvals.lock().await.remove(&update_id);
        if let Ok(record) = self.registry.load(update_id).await {
            if let Some(original) = record.rollback_of {
                self.rollbacks_in_flight.lock().await.remove(&original);
            }
        }
    }

    async fn drive(&self, update_id: Uuid) -> Result<()> {
        let record = self.registry.load(update_id).await?;

        let record = match self.stage_governance(record).await? {
            Flow::Continue(r) => r,
            Flow::Halted => return Ok(()),
        };
        let record = match self.stage_sign(record).await? {
            Flow::Continue(r) => r,
            Flow::Halted => return Ok(()),
        };
        let record = match self.stage_log_proposed(record).await? {
            Flow::Continue(r) => r,
            Flow::Halted => return Ok(()),
        };
        let record = match self.stage_validate(record).await? {
            Flow::Continue(r) => r,
            Flow::Halted => return Ok(()),
        };
        let record = match self.stage_package(record).await? {
            Flow::Continue(r) => r,
            Flow::Halted => return Ok(()),
        };
        let record = match self.stage_distribute(record).await? {
            Flow::Continue(r) => r,
            Flow::Halted => return Ok(()),
        };
        let record = match self.stage_log_complete(record).await? {
            Flow::Continue(r) => r,
            Flow::Halted => return Ok(()),
        };
        match self.stage_watch(record).await? {
            Flow::Continue(_) | Flow::Halted => Ok(()),
        }
    }

    // ── Stage 1: governance check ─────────────────────────────

    async fn stage_governance(&self, record: UpdateRecord) -> Result<Flow> {
        let summary = canonical::payload_summary(&record.descriptor.payload, PAYLOAD_SUMMARY_MAX);
        let kind = record.descriptor.kind;
        let risk = record.descriptor.risk_level;
        let created_by = record.descriptor.created_by.clone();

        let decision = match retry_stage(&self.config, record.update_id, "governance", || {
            self.governance.check(kind, &summary, risk, &created_by)
        })
        .await
        {
            RetryResult::Ok(decision) => decision,
            RetryResult::Exhausted {
                attempts,
                last_error,
            } => {
                return self
                    .fail_infrastructure(&record, "governance", attempts, &last_error)
                    .await
            }
            RetryResult::Fatal(e) => return Err(e),
        };

        match decision.verdict {
            GovernanceVerdict::Deny => {
                let reason = decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| "denied by governance policy".to_string());
                // The denial is part of the record's history even though the
                // stage never completes.
                let mut commit = StageCommit::fields_only(Utc::now());
                commit.governance_decision = Some(decision);
                self.registry.apply(record.update_id, commit).await?;
                self.reject(&record, codes::G_POLICY_DENIED, &reason, None)
                    .await
            }
            GovernanceVerdict::Approve => {
                let mut commit = StageCommit::to(UpdateStatus::GovernanceChecked, Utc::now());
                commit.governance_decision = Some(decision);
                let record = self.registry.apply(record.update_id, commit).await?;
                metrics::emit_stage(record.update_id, record.status);
                Ok(Flow::Continue(record))
            }
            GovernanceVerdict::ApproveWithConditions => {
                if risk != RiskLevel::High {
                    // Conditions are recorded; only high risk blocks on the
                    // human reference.
                    let mut decision = decision;
                    decision.resolved_at = Some(Utc::now());
                    let mut commit = StageCommit::to(UpdateStatus::GovernanceChecked, Utc::now());
                    commit.governance_decision = Some(decision);
                    let record = self.registry.apply(record.update_id, commit).await?;
                    metrics::emit_stage(record.update_id, record.status);
                    return Ok(Flow::Continue(record));
                }

                let approval_ref = match decision.approval_ref.clone() {
                    Some(r) => r,
                    None => {
                        return self
                            .reject(
                                &record,
                                codes::G_APPROVAL_MISSING_REF,
                                "conditional approval without a trackable reference",
                                None,
                            )
                            .await
                    }
                };

                // Register the wakeup channel before the marker becomes
                // visible, so a caller observing pending_approval can always
                // resolve it.
                let (tx, rx) = oneshot::channel();
                self.pending_approvals
                    .lock()
                    .await
                    .insert(record.update_id, tx);

                let mut commit = StageCommit::to(UpdateStatus::GovernanceChecked, Utc::now());
                commit.governance_decision = Some(decision);
                commit.pending_approval = Some(approval_ref.clone());
                let record = match self.registry.apply(record.update_id, commit).await {
                    Ok(record) => record,
                    Err(e) => {
                        self.pending_approvals
                            .lock()
                            .await
                            .remove(&record.update_id);
                        return Err(e);
                    }
                };
                metrics::emit_stage(record.update_id, record.status);

                self.await_approval(record, approval_ref, rx).await
            }
        }
    }

    /// Suspend until the human approval resolves, is aborted, or the
    /// abandonment window elapses. The only suspension point in the
    /// pipeline, and the only cancellable one.
    async fn await_approval(
        &self,
        record: UpdateRecord,
        approval_ref: String,
        rx: oneshot::Receiver<ApprovalSignal>,
    ) -> Result<Flow> {
        metrics::emit_approval_pending(record.update_id, &approval_ref);

        let signal = tokio::select! {
            signal = rx => signal.ok(),
            _ = tokio::time::sleep(self.config.approval_abandon_after) => None,
        };
        self.pending_approvals.lock().await.remove(&record.update_id);

        match signal {
            Some(ApprovalSignal::Resolved) => {
                let mut commit = StageCommit::fields_only(Utc::now());
                commit.resolve_approval = Some(Utc::now());
                let record = self.registry.apply(record.update_id, commit).await?;
                metrics::emit_approval_resolved(record.update_id, &approval_ref);
                Ok(Flow::Continue(record))
            }
            Some(ApprovalSignal::Aborted { reason }) => {
                self.reject(&record, codes::G_APPROVAL_ABORTED, &reason, None)
                    .await
            }
            None => {
                self.reject(
                    &record,
                    codes::G_APPROVAL_ABANDONED,
                    "approval not resolved within the abandonment window",
                    None,
                )
                .await
            }
        }
    }

    // ── Stage 2: signing ──────────────────────────────────────

    async fn stage_sign(&self, record: UpdateRecord) -> Result<Flow> {
        let decision = record.governance_decision.clone().ok_or_else(|| {
            HubError::Internal(anyhow::anyhow!("signing reached without a governance decision"))
        })?;
        if !decision.cleared_for_signing() {
            return Err(HubError::Internal(anyhow::anyhow!(
                "signing reached with an uncleared governance decision"
            )));
        }

        let bytes = canonical::sign_bytes(&record.descriptor, &decision)?;
        let signature = match retry_stage(&self.config, record.update_id, "signing", || {
            self.signer.sign(&bytes)
        })
        .await
        {
            RetryResult::Ok(signature) => signature,
            RetryResult::Exhausted {
                attempts,
                last_error,
            } => {
                return self
                    .fail_infrastructure(&record, "signing", attempts, &last_error)
                    .await
            }
            RetryResult::Fatal(e) => return Err(e),
        };

        let mut commit = StageCommit::to(UpdateStatus::Signed, Utc::now());
        commit.signature = Some(signature);
        let record = self.registry.apply(record.update_id, commit).await?;
        metrics::emit_stage(record.update_id, record.status);
        Ok(Flow::Continue(record))
    }

    // ── Stage 3: proposal logging ─────────────────────────────

    async fn stage_log_proposed(&self, record: UpdateRecord) -> Result<Flow> {
        let fields = json!({
            "kind": record.descriptor.kind,
            "risk_level": record.descriptor.risk_level,
            "governance_decision": record.governance_decision,
            "signature": record.signature,
            "payload_checksum": record.payload_checksum,
            "rollback_of": record.rollback_of,
        });

        let sequence = match retry_stage(&self.config, record.update_id, "proposal_logging", || {
            self.audit
                .append(codes::EVENT_PROPOSED, record.update_id, &fields)
        })
        .await
        {
            RetryResult::Ok(sequence) => sequence,
            RetryResult::Exhausted {
                attempts,
                last_error,
            } => {
                return self
                    .fail_infrastructure(&record, "proposal_logging", attempts, &last_error)
                    .await
            }
            RetryResult::Fatal(e) => return Err(e),
        };

        let mut commit = StageCommit::to(UpdateStatus::LoggedProposed, Utc::now());
        commit.audit_sequence_number = Some(sequence);
        let record = self.registry.apply(record.update_id, commit).await?;
        metrics::emit_stage(record.update_id, record.status);
        Ok(Flow::Continue(record))
    }

    // ── Stage 4: validation ───────────────────────────────────

    async fn stage_validate(&self, record: UpdateRecord) -> Result<Flow> {
        let validator = match self.validators.validator_for(record.descriptor.kind) {
            Ok(v) => v,
            Err(e) => {
                // Missing registration is a deployment defect, not a policy
                // judgment on the update.
                return self
                    .fail_infrastructure(&record, "validation", 0, &e.to_string())
                    .await;
            }
        };

        let bound = self.config.validation_timeout(record.descriptor.risk_level);
        let risk = record.descriptor.risk_level;

        let outcome = match retry_stage(&self.config, record.update_id, "validation", || {
            let validator = validator.clone();
            let payload = record.descriptor.payload.clone();
            async move {
                match tokio::time::timeout(bound, validator.validate(&payload, risk)).await {
                    Ok(result) => result,
                    // Unbounded execution is itself a risk signal: a timeout
                    // is a validation FAIL, never an infrastructure failure.
                    Err(_) => Ok(ValidationOutcome::fail_with(vec![Diagnostic::error(
                        codes::V_EXEC_TIMEOUT,
                        format!("validation exceeded its {}ms bound", bound.as_millis()),
                    )])),
                }
            }
        })
        .await
        {
            RetryResult::Ok(outcome) => outcome,
            RetryResult::Exhausted {
                attempts,
                last_error,
            } => {
                return self
                    .fail_infrastructure(&record, "validation", attempts, &last_error)
                    .await
            }
            RetryResult::Fatal(e) => return Err(e),
        };

        if !outcome.pass {
            let reason = format!(
                "validation failed with {} diagnostic(s)",
                outcome.diagnostics.len()
            );
            return self
                .reject(&record, codes::V_VALIDATION_FAILED, &reason, Some(outcome))
                .await;
        }

        let mut commit = StageCommit::to(UpdateStatus::Validated, Utc::now());
        commit.validation = Some(outcome);
        let record = self.registry.apply(record.update_id, commit).await?;
        metrics::emit_stage(record.update_id, record.status);
        Ok(Flow::Continue(record))
    }

    // ── Stage 5: packaging ────────────────────────────────────

    async fn stage_package(&self, record: UpdateRecord) -> Result<Flow> {
        let package = package::build_package(&record.descriptor, &self.applied).await?;
        let mut commit = StageCommit::to(UpdateStatus::Packaged, Utc::now());
        commit.package = Some(package);
        let record = self.registry.apply(record.update_id, commit).await?;
        metrics::emit_stage(record.update_id, record.status);
        Ok(Flow::Continue(record))
    }

    // ── Stage 6: distribution ─────────────────────────────────

    async fn stage_distribute(&self, record: UpdateRecord) -> Result<Flow> {
        let package = record.package.clone().ok_or_else(|| {
            HubError::Internal(anyhow::anyhow!("distribution reached without a package"))
        })?;

        let topic = record.descriptor.kind.topic();
        let event = json!({
            "update_id": record.update_id,
            "kind": record.descriptor.kind,
            "checksum": package.checksum,
            "signature": record.signature,
            "package": package,
            "component_targets": record.descriptor.component_targets,
            "payload": record.descriptor.payload,
            "rollback_of": record.rollback_of,
        });

        let event_id = match retry_stage(&self.config, record.update_id, "distribution", || {
            self.bus.publish(topic, &event)
        })
        .await
        {
            RetryResult::Ok(event_id) => event_id,
            RetryResult::Exhausted {
                attempts,
                last_error,
            } => {
                return self
                    .fail_infrastructure(&record, "distribution", attempts, &last_error)
                    .await
            }
            RetryResult::Fatal(e) => return Err(e),
        };

        let mut commit = StageCommit::to(UpdateStatus::Distributed, Utc::now());
        commit.distribution_event_id = Some(event_id.clone());
        let record = self.registry.apply(record.update_id, commit).await?;
        metrics::emit_distributed(record.update_id, topic, &event_id);

        self.applied.record_distribution(&record).await;

        if let Some(original) = record.rollback_of {
            self.finalize_rollback(original, record.update_id).await;
        }

        Ok(Flow::Continue(record))
    }

    /// Flip the original to RolledBack, now that its rollback has
    /// distributed. The original never gets edited retroactively beyond
    /// this one status transition.
    async fn finalize_rollback(&self, original: Uuid, rolled_back_by: Uuid) {
        let fields = json!({ "rolled_back_by": rolled_back_by });
        let sequence = self
            .audit
            .append(codes::EVENT_ROLLED_BACK, original, &fields)
            .await
            .ok();

        let mut commit = StageCommit::to(UpdateStatus::RolledBack, Utc::now());
        commit.rolled_back_by = Some(rolled_back_by);
        commit.audit_sequence_number = sequence;

        match self.registry.apply(original, commit).await {
            Ok(_) => metrics::emit_rolled_back(original, rolled_back_by),
            Err(e) => tracing::error!(
                original = %original,
                rolled_back_by = %rolled_back_by,
                error = %e,
                "Pipeline: failed to flip original to rolled_back"
            ),
        }
    }

    // ── Stage 7: completion logging ───────────────────────────

    async fn stage_log_complete(&self, record: UpdateRecord) -> Result<Flow> {
        let fields = json!({
            "distribution_event_id": record.distribution_event_id,
            "payload_checksum": record.payload_checksum,
        });

        let sequence =
            match retry_stage(&self.config, record.update_id, "completion_logging", || {
                self.audit
                    .append(codes::EVENT_DISTRIBUTED, record.update_id, &fields)
            })
            .await
            {
                RetryResult::Ok(sequence) => sequence,
                RetryResult::Exhausted {
                    attempts,
                    last_error,
                } => {
                    return self
                        .fail_infrastructure(&record, "completion_logging", attempts, &last_error)
                        .await
                }
                RetryResult::Fatal(e) => return Err(e),
            };

        let mut commit = StageCommit::to(UpdateStatus::LoggedComplete, Utc::now());
        commit.audit_sequence_number = Some(sequence);
        let record = self.registry.apply(record.update_id, commit).await?;
        metrics::emit_stage(record.update_id, record.status);
        Ok(Flow::Continue(record))
    }

    // ── Stage 8: watchdog registration ────────────────────────

    async fn stage_watch(&self, record: UpdateRecord) -> Result<Flow> {
        let baseline = json!({
            "payload_checksum": record.payload_checksum,
            "distribution_event_id": record.distribution_event_id,
            "observation_window_secs": self.config.observation_window.as_secs(),
        });
        let targets = record.descriptor.component_targets.clone();

        match retry_stage(&self.config, record.update_id, "watchdog_registration", || {
            self.watchdog.register(record.update_id, &targets, &baseline)
        })
        .await
        {
            RetryResult::Ok(()) => {}
            RetryResult::Exhausted {
                attempts,
                last_error,
            } => {
                return self
                    .fail_infrastructure(&record, "watchdog_registration", attempts, &last_error)
                    .await
            }
            RetryResult::Fatal(e) => return Err(e),
        }

        let commit = StageCommit::to(UpdateStatus::Watched, Utc::now());
        let record = self.registry.apply(record.update_id, commit).await?;
        metrics::emit_stage(record.update_id, record.status);
        Ok(Flow::Continue(record))
    }

    // ── Halt commits ──────────────────────────────────────────

    /// Persist a policy rejection. The rejection itself is audit-logged
    /// best-effort — a flaky audit log must not mask the policy judgment.
    async fn reject(
        &self,
        record: &UpdateRecord,
        code: &str,
        reason: &str,
        validation: Option<ValidationOutcome>,
    ) -> Result<Flow> {
        metrics::emit_rejected(record.update_id, code, reason);

        let fields = json!({ "code": code, "reason": reason });
        let sequence = self
            .audit
            .append(codes::EVENT_REJECTED, record.update_id, &fields)
            .await
            .ok();

        let mut commit = StageCommit::to(UpdateStatus::Rejected, Utc::now());
        commit.failure = Some(FailureInfo {
            code: code.to_string(),
            reason: reason.to_string(),
        });
        commit.validation = validation;
        commit.audit_sequence_number = sequence;
        self.registry.apply(record.update_id, commit).await?;
        Ok(Flow::Halted)
    }

    /// Persist retry-budget exhaustion. Distinct from Rejected: it reflects
    /// pipeline health, not a judgment on the update.
    async fn fail_infrastructure(
        &self,
        record: &UpdateRecord,
        stage: &str,
        attempts: u32,
        last_error: &str,
    ) -> Result<Flow> {
        metrics::emit_infra_failed(record.update_id, stage, attempts);

        let mut commit = StageCommit::to(UpdateStatus::FailedInfrastructure, Utc::now());
        commit.infra_retries = Some(attempts);
        commit.failure = Some(FailureInfo {
            code: codes::INFRA_RETRY_EXHAUSTED.to_string(),
            reason: format!("{stage}: {last_error}"),
        });
        self.registry.apply(record.update_id, commit).await?;
        Ok(Flow::Halted)
    }

    // ── Approval entry points ─────────────────────────────────

    pub(crate) async fn resolve_approval(&self, update_id: Uuid, approval_ref: &str) -> Result<()> {
        let record = self.registry.load(update_id).await?;
        match record.pending_approval.as_deref() {
            Some(expected) if expected == approval_ref => {}
            Some(expected) => {
                return Err(HubError::InvalidInput(format!(
                    "approval reference mismatch: update {update_id} awaits '{expected}'"
                )))
            }
            None => {
                return Err(HubError::Conflict(format!(
                    "update {update_id} has no pending approval"
                )))
            }
        }

        let sender = self
            .pending_approvals
            .lock()
            .await
            .remove(&update_id)
            .ok_or_else(|| {
                HubError::Conflict(format!("update {update_id} is not awaiting approval"))
            })?;
        sender
            .send(ApprovalSignal::Resolved)
            .map_err(|_| HubError::Conflict("approval wait already completed".to_string()))?;
        Ok(())
    }

    pub(crate) async fn abort_pending(&self, update_id: Uuid, reason: &str) -> Result<()> {
        let record = self.registry.load(update_id).await?;
        if record.pending_approval.is_none() {
            return Err(HubError::Conflict(format!(
                "update {update_id} has no pending approval"
            )));
        }

        let sender = self
            .pending_approvals
            .lock()
            .await
            .remove(&update_id)
            .ok_or_else(|| {
                HubError::Conflict(format!("update {update_id} is not awaiting approval"))
            })?;
        sender
            .send(ApprovalSignal::Aborted {
                reason: reason.to_string(),
            })
            .map_err(|_| HubError::Conflict("approval wait already completed".to_string()))?;
        Ok(())
    }
}
