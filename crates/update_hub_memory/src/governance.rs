//! Policy-table governance oracle — risk-tiered decisions with explicit
//! deny lists. Satisfies the yes/no/escalate oracle contract for in-process
//! deployments and tests; real governance engines plug in behind the same
//! port.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use update_hub_core::ports::{GovernanceOracle, Result};
use update_hub_core::types::{GovernanceDecision, GovernanceVerdict, RiskLevel, UpdateKind};

/// Default decision table:
///   low / medium risk  → Approve
///   high risk          → ApproveWithConditions with a generated approval ref
///   denied creator/kind → Deny with reason
pub struct PolicyTableOracle {
    denied_creators: HashSet<String>,
    denied_kinds: HashSet<UpdateKind>,
    /// When false, high risk gets a plain Approve (useful for rollback
    /// drills where no human is on the hook).
    escalate_high_risk: bool,
}

impl Default for PolicyTableOracle {
    fn default() -> Self {
        Self {
            denied_creators: HashSet::new(),
            denied_kinds: HashSet::new(),
            escalate_high_risk: true,
        }
    }
}

impl PolicyTableOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve everything, all tiers. No escalation.
    pub fn approve_all() -> Self {
        Self {
            escalate_high_risk: false,
            ..Self::default()
        }
    }

    pub fn deny_creator(mut self, creator: &str) -> Self {
        self.denied_creators.insert(creator.to_string());
        self
    }

    pub fn deny_kind(mut self, kind: UpdateKind) -> Self {
        self.denied_kinds.insert(kind);
        self
    }
}

#[async_trait]
impl GovernanceOracle for PolicyTableOracle {
    async fn check(
        &self,
        kind: UpdateKind,
        _payload_summary: &str,
        risk_level: RiskLevel,
        created_by: &str,
    ) -> Result<GovernanceDecision> {
        if self.denied_creators.contains(created_by) {
            return Ok(GovernanceDecision {
                verdict: GovernanceVerdict::Deny,
                approval_ref: None,
                reason: Some(format!("principal '{created_by}' is not permitted to submit updates")),
                resolved_at: None,
            });
        }

        if self.denied_kinds.contains(&kind) {
            return Ok(GovernanceDecision {
                verdict: GovernanceVerdict::Deny,
                approval_ref: None,
                reason: Some(format!("updates of kind '{kind}' are frozen by policy")),
                resolved_at: None,
            });
        }

        if risk_level == RiskLevel::High && self.escalate_high_risk {
            return Ok(GovernanceDecision {
                verdict: GovernanceVerdict::ApproveWithConditions,
                approval_ref: Some(format!("appr-{}", Uuid::new_v4())),
                reason: Some("high risk requires human sign-off".to_string()),
                resolved_at: None,
            });
        }

        Ok(GovernanceDecision {
            verdict: GovernanceVerdict::Approve,
            approval_ref: None,
            reason: None,
            resolved_at: None,
        })
    }
}
