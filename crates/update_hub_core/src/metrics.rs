//! Stage telemetry — structured tracing events emitted by the orchestrator
//! and service. Kept in one place so the event vocabulary stays consistent.

use uuid::Uuid;

use crate::types::{RiskLevel, UpdateKind, UpdateStatus};

pub fn emit_submitted(update_id: Uuid, kind: UpdateKind, risk: RiskLevel, deduped: bool) {
    tracing::info!(
        update_id = %update_id,
        kind = %kind,
        risk = %risk,
        deduped,
        "Pipeline: update submitted"
    );
}

pub fn emit_stage(update_id: Uuid, status: UpdateStatus) {
    tracing::info!(
        update_id = %update_id,
        status = %status,
        "Pipeline: stage committed"
    );
}

pub fn emit_rejected(update_id: Uuid, code: &str, reason: &str) {
    tracing::warn!(
        update_id = %update_id,
        code,
        reason,
        "Pipeline: update rejected"
    );
}

pub fn emit_retry(update_id: Uuid, stage: &str, attempt: u32, error: &str) {
    tracing::debug!(
        update_id = %update_id,
        stage,
        attempt,
        error,
        "Pipeline: stage retry after infrastructure failure"
    );
}

pub fn emit_infra_failed(update_id: Uuid, stage: &str, attempts: u32) {
    tracing::error!(
        update_id = %update_id,
        stage,
        attempts,
        "Pipeline: stage retry budget exhausted"
    );
}

pub fn emit_distributed(update_id: Uuid, topic: &str, event_id: &str) {
    tracing::info!(
        update_id = %update_id,
        topic,
        event_id,
        "Pipeline: update distributed"
    );
}

pub fn emit_approval_pending(update_id: Uuid, approval_ref: &str) {
    tracing::info!(
        update_id = %update_id,
        approval_ref,
        "Pipeline: suspended awaiting human approval"
    );
}

pub fn emit_approval_resolved(update_id: Uuid, approval_ref: &str) {
    tracing::info!(
        update_id = %update_id,
        approval_ref,
        "Pipeline: human approval resolved"
    );
}

pub fn emit_rollback_requested(original: Uuid, rollback_id: Uuid, code: &str, reason: &str) {
    tracing::warn!(
        original = %original,
        rollback_id = %rollback_id,
        code,
        reason,
        "Pipeline: rollback requested"
    );
}

pub fn emit_rolled_back(original: Uuid, rolled_back_by: Uuid) {
    tracing::warn!(
        original = %original,
        rolled_back_by = %rolled_back_by,
        "Pipeline: original update rolled back"
    );
}
