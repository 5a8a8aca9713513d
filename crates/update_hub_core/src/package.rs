//! Package construction — the checksummed, rollback-capable artifact built
//! once validation passes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::applied::AppliedStateIndex;
use crate::canonical;
use crate::error::HubError;
use crate::types::{Package, RollbackStep, UpdateDescriptor, UpdateRecord};

/// Build the package for a validated descriptor. Deterministic and
/// idempotent: for the same descriptor and the same applied state, the
/// output is byte-identical.
pub async fn build_package(
    descriptor: &UpdateDescriptor,
    applied: &AppliedStateIndex,
) -> Result<Package, HubError> {
    if descriptor.component_targets.is_empty() {
        return Err(HubError::InvalidInput(
            "descriptor declares no component targets".to_string(),
        ));
    }

    let checksum = canonical::payload_checksum(&descriptor.payload);
    let priors = applied
        .priors_for(descriptor.kind, descriptor.component_targets.iter())
        .await;

    let rollback = priors
        .into_iter()
        .map(|(target, prior)| {
            let step = match prior {
                Some(prior) => RollbackStep::Restore { prior },
                None => RollbackStep::Remove,
            };
            (target, step)
        })
        .collect();

    Ok(Package { checksum, rollback })
}

/// Parse a payload as rollback instructions (target → step). Returns `None`
/// when the payload is not instruction-shaped, which is how a rollback
/// record's payload is distinguished from an ordinary one.
pub fn rollback_instructions(
    payload: &serde_json::Value,
) -> Option<BTreeMap<String, RollbackStep>> {
    let map: BTreeMap<String, RollbackStep> = serde_json::from_value(payload.clone()).ok()?;
    if map.is_empty() {
        return None;
    }
    Some(map)
}

/// Build the descriptor for a rollback of `original`. Same kind, same
/// targets, same risk tier; the payload is the original's stored rollback
/// instructions, so the new record flows through the entire pipeline —
/// governance and validation included — before anything is undone.
pub fn rollback_descriptor(
    original: &UpdateRecord,
    requested_by: &str,
    now: DateTime<Utc>,
) -> Result<UpdateDescriptor, HubError> {
    let package = original.package.as_ref().ok_or_else(|| {
        HubError::Conflict(format!(
            "update {} has no package to roll back",
            original.update_id
        ))
    })?;

    let payload = serde_json::to_value(&package.rollback)
        .map_err(|e| HubError::Internal(anyhow::anyhow!("rollback payload: {e}")))?;

    Ok(UpdateDescriptor {
        kind: original.descriptor.kind,
        payload,
        component_targets: original.descriptor.component_targets.clone(),
        created_by: requested_by.to_string(),
        risk_level: original.descriptor.risk_level,
        requested_at: now,
    })
}

/// Independent package verification: recompute the checksum from the
/// descriptor alone and compare. No orchestrator state involved.
pub fn verify_checksum(descriptor: &UpdateDescriptor, package: &Package) -> bool {
    canonical::payload_checksum(&descriptor.payload) == package.checksum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskLevel, UpdateKind};
    use serde_json::json;
    use uuid::Uuid;

    fn descriptor(targets: &[&str]) -> UpdateDescriptor {
        UpdateDescriptor {
            kind: UpdateKind::Config,
            payload: json!({"max_connections": 50}),
            component_targets: targets.iter().map(|t| t.to_string()).collect(),
            created_by: "ops".into(),
            risk_level: RiskLevel::Low,
            requested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_registration_packages_remove_steps() {
        let applied = AppliedStateIndex::new();
        let package = build_package(&descriptor(&["api"]), &applied).await.unwrap();
        assert_eq!(package.rollback.len(), 1);
        assert_eq!(package.rollback["api"], RollbackStep::Remove);
    }

    #[tokio::test]
    async fn prior_value_packages_restore_steps() {
        let applied = AppliedStateIndex::new();
        let first = UpdateRecord::new(Uuid::new_v4(), descriptor(&["api"]), None, Utc::now());
        applied.record_distribution(&first).await;

        let mut next = descriptor(&["api"]);
        next.payload = json!({"max_connections": 100});
        let package = build_package(&next, &applied).await.unwrap();
        assert_eq!(
            package.rollback["api"],
            RollbackStep::Restore {
                prior: json!({"max_connections": 50})
            }
        );
        assert_eq!(package.checksum, canonical::payload_checksum(&next.payload));
    }

    #[tokio::test]
    async fn packaging_is_idempotent() {
        let applied = AppliedStateIndex::new();
        let d = descriptor(&["api", "worker"]);
        let p1 = build_package(&d, &applied).await.unwrap();
        let p2 = build_package(&d, &applied).await.unwrap();
        let bytes1 = serde_json::to_vec(&p1).unwrap();
        let bytes2 = serde_json::to_vec(&p2).unwrap();
        assert_eq!(bytes1, bytes2);
    }

    #[tokio::test]
    async fn empty_targets_are_rejected() {
        let applied = AppliedStateIndex::new();
        let err = build_package(&descriptor(&[]), &applied).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidInput(_)));
    }

    #[test]
    fn rollback_instructions_round_trip() {
        let payload = json!({
            "api": {"action": "restore", "prior": {"max_connections": 50}},
            "worker": {"action": "remove"}
        });
        let steps = rollback_instructions(&payload).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps["worker"], RollbackStep::Remove);
        assert!(rollback_instructions(&json!({"max_connections": 50})).is_none());
        assert!(rollback_instructions(&json!({})).is_none());
    }

    #[tokio::test]
    async fn rollback_descriptor_carries_instructions_as_payload() {
        let applied = AppliedStateIndex::new();
        let d = descriptor(&["api"]);
        let mut record = UpdateRecord::new(Uuid::new_v4(), d.clone(), None, Utc::now());
        record.package = Some(build_package(&d, &applied).await.unwrap());

        let rb = rollback_descriptor(&record, "oncall", Utc::now()).unwrap();
        assert_eq!(rb.kind, UpdateKind::Config);
        assert_eq!(rb.component_targets, d.component_targets);
        let steps = rollback_instructions(&rb.payload).unwrap();
        assert_eq!(steps["api"], RollbackStep::Remove);
    }

    #[tokio::test]
    async fn rollback_descriptor_requires_a_package() {
        let record = UpdateRecord::new(Uuid::new_v4(), descriptor(&["api"]), None, Utc::now());
        assert!(rollback_descriptor(&record, "oncall", Utc::now()).is_err());
    }

    #[tokio::test]
    async fn verify_checksum_detects_tampering() {
        let applied = AppliedStateIndex::new();
        let d = descriptor(&["api"]);
        let mut package = build_package(&d, &applied).await.unwrap();
        assert!(verify_checksum(&d, &package));
        package.checksum = "0".repeat(64);
        assert!(!verify_checksum(&d, &package));
    }
}
