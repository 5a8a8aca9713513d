//! Update pipeline types — descriptor, lifecycle record, package, views.
//! Pure value types — no I/O, no port dependencies.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical;
use crate::error::HubError;

// ── Update kind ────────────────────────────────────────────────

/// Kind discriminator for system-altering updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Schema,
    CodeModule,
    Playbook,
    Config,
    MetricDefinition,
}

impl UpdateKind {
    /// All kinds, in declaration order. Used to build exhaustive
    /// validator registration tables.
    pub const ALL: [UpdateKind; 5] = [
        Self::Schema,
        Self::CodeModule,
        Self::Playbook,
        Self::Config,
        Self::MetricDefinition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::CodeModule => "code_module",
            Self::Playbook => "playbook",
            Self::Config => "config",
            Self::MetricDefinition => "metric_definition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schema" => Some(Self::Schema),
            "code_module" => Some(Self::CodeModule),
            "playbook" => Some(Self::Playbook),
            "config" => Some(Self::Config),
            "metric_definition" => Some(Self::MetricDefinition),
            _ => None,
        }
    }

    /// Distribution bus topic for this kind.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Schema => "update.schema",
            Self::CodeModule => "update.code_module",
            Self::Playbook => "update.playbook",
            Self::Config => "update.config",
            Self::MetricDefinition => "update.metric_definition",
        }
    }
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Risk level ─────────────────────────────────────────────────

/// Declared blast-radius tier; scales validation depth and governance
/// strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Update status (12-state lifecycle) ─────────────────────────

/// Lifecycle status for an update record.
///
/// Pipeline order (completing stage N commits the Nth status):
///   Submitted → GovernanceChecked → Signed → LoggedProposed → Validated
///   → Packaged → Distributed → LoggedComplete → Watched
///
/// Absorbing states:
///   Rejected             (governance deny, validation fail, approval abort/abandon)
///   RolledBack           (from Watched, once the rollback record distributes)
///   FailedInfrastructure (stage retry budget exhausted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Submitted,
    GovernanceChecked,
    Signed,
    LoggedProposed,
    Validated,
    Packaged,
    Distributed,
    LoggedComplete,
    Watched,
    Rejected,
    RolledBack,
    FailedInfrastructure,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::GovernanceChecked => "governance_checked",
            Self::Signed => "signed",
            Self::LoggedProposed => "logged_proposed",
            Self::Validated => "validated",
            Self::Packaged => "packaged",
            Self::Distributed => "distributed",
            Self::LoggedComplete => "logged_complete",
            Self::Watched => "watched",
            Self::Rejected => "rejected",
            Self::RolledBack => "rolled_back",
            Self::FailedInfrastructure => "failed_infrastructure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "governance_checked" => Some(Self::GovernanceChecked),
            "signed" => Some(Self::Signed),
            "logged_proposed" => Some(Self::LoggedProposed),
            "validated" => Some(Self::Validated),
            "packaged" => Some(Self::Packaged),
            "distributed" => Some(Self::Distributed),
            "logged_complete" => Some(Self::LoggedComplete),
            "watched" => Some(Self::Watched),
            "rejected" => Some(Self::Rejected),
            "rolled_back" => Some(Self::RolledBack),
            "failed_infrastructure" => Some(Self::FailedInfrastructure),
            _ => None,
        }
    }

    /// Position in the canonical pipeline order; `None` for absorbing states.
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            Self::Submitted => Some(0),
            Self::GovernanceChecked => Some(1),
            Self::Signed => Some(2),
            Self::LoggedProposed => Some(3),
            Self::Validated => Some(4),
            Self::Packaged => Some(5),
            Self::Distributed => Some(6),
            Self::LoggedComplete => Some(7),
            Self::Watched => Some(8),
            Self::Rejected | Self::RolledBack | Self::FailedInfrastructure => None,
        }
    }

    /// Whether this status is absorbing (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::RolledBack | Self::FailedInfrastructure
        )
    }

    /// Whether the update's change has taken effect somewhere
    /// (stage 6 completed).
    pub fn is_distributed(&self) -> bool {
        matches!(
            self,
            Self::Distributed | Self::LoggedComplete | Self::Watched | Self::RolledBack
        )
    }

    /// Whether `to` is a legal next status from `self`.
    ///
    /// Forward motion is strictly one stage at a time. Rejected is reachable
    /// only from the stages where a policy judgment happens: Submitted
    /// (governance deny), GovernanceChecked (approval abort/abandonment) and
    /// LoggedProposed (validation fail). FailedInfrastructure is reachable
    /// from any non-terminal stage except the Watched resting state.
    /// RolledBack is reachable from Watched only.
    pub fn can_transition(&self, to: UpdateStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            Self::Rejected => matches!(
                self,
                Self::Submitted | Self::GovernanceChecked | Self::LoggedProposed
            ),
            Self::RolledBack => *self == Self::Watched,
            Self::FailedInfrastructure => *self != Self::Watched,
            _ => match (self.stage_index(), to.stage_index()) {
                (Some(from), Some(next)) => next == from + 1,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Descriptor ─────────────────────────────────────────────────

/// The immutable input describing a proposed change. Never mutated after
/// submission is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub kind: UpdateKind,
    /// Kind-specific structured body. The package checksum is computed over
    /// this value alone.
    pub payload: serde_json::Value,
    /// Consumers expected to apply the change.
    pub component_targets: BTreeSet<String>,
    pub created_by: String,
    pub risk_level: RiskLevel,
    pub requested_at: DateTime<Utc>,
}

// ── Governance decision ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceVerdict {
    Approve,
    Deny,
    ApproveWithConditions,
}

impl GovernanceVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
            Self::ApproveWithConditions => "approve_with_conditions",
        }
    }
}

impl std::fmt::Display for GovernanceVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the governance check, set once per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceDecision {
    pub verdict: GovernanceVerdict,
    /// Trackable human approval reference for conditional approvals.
    pub approval_ref: Option<String>,
    pub reason: Option<String>,
    /// When a conditional approval was observed as resolved. Set immediately
    /// for non-high risk; set by `resolve_approval` for high risk.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl GovernanceDecision {
    /// Whether signing may proceed on this decision.
    pub fn cleared_for_signing(&self) -> bool {
        match self.verdict {
            GovernanceVerdict::Approve => true,
            GovernanceVerdict::ApproveWithConditions => self.resolved_at.is_some(),
            GovernanceVerdict::Deny => false,
        }
    }
}

// ── Signature ──────────────────────────────────────────────────

/// Signature over the canonical serialization of
/// (descriptor, governance_decision). Cannot exist before the governance
/// stage completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub signature: String,
    pub identity: String,
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

/// A single validator finding with a structured code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl Diagnostic {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            context: None,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
            context: None,
        }
    }
}

/// Result of the validation stage, set once and retained for audit on both
/// pass and fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub pass: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationOutcome {
    pub fn pass_with(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            pass: true,
            diagnostics,
        }
    }

    pub fn fail_with(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            pass: false,
            diagnostics,
        }
    }
}

// ── Package ────────────────────────────────────────────────────

/// Per-target rollback instruction, computed at packaging time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RollbackStep {
    /// Restore the value that was in effect before this update distributed.
    Restore { prior: serde_json::Value },
    /// First-ever registration of this target: remove on rollback.
    Remove,
}

/// The deterministic, checksummed, rollback-capable artifact derived from a
/// validated update. Immutable once constructed; rebuilding it for the same
/// record and applied state yields byte-identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// SHA-256 over the canonical serialization of `descriptor.payload` —
    /// independently verifiable by any party holding the descriptor.
    pub checksum: String,
    pub rollback: BTreeMap<String, RollbackStep>,
}

// ── Failure info ───────────────────────────────────────────────

/// Structured reason attached when a record enters Rejected or
/// FailedInfrastructure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub code: String,
    pub reason: String,
}

// ── Status history ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: UpdateStatus,
    pub at: DateTime<Utc>,
}

// ── Update record ──────────────────────────────────────────────

/// The core lifecycle entity. Mutated only through [`StageCommit`] applied by
/// the registry; the descriptor inside is never touched after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub update_id: Uuid,
    pub descriptor: UpdateDescriptor,
    /// Checksum of `descriptor.payload`, fixed at submission. Used for
    /// content-addressed submit dedupe and independent package verification.
    pub payload_checksum: String,
    pub status: UpdateStatus,
    pub governance_decision: Option<GovernanceDecision>,
    /// Approval reference awaited by a suspended high-risk conditional
    /// approval. The observable suspension marker.
    pub pending_approval: Option<String>,
    pub signature: Option<SignatureEnvelope>,
    pub validation: Option<ValidationOutcome>,
    pub package: Option<Package>,
    pub distribution_event_id: Option<String>,
    /// Audit log sequence numbers, in append order, one per logged event.
    pub audit_sequence_numbers: Vec<u64>,
    /// Append-only, monotonically increasing in time.
    pub status_history: Vec<StatusEntry>,
    /// Back-reference when this record is itself a rollback of a prior update.
    pub rollback_of: Option<Uuid>,
    /// Forward-reference set on the original when its rollback distributes.
    pub rolled_back_by: Option<Uuid>,
    /// Infrastructure retry count, surfaced when FailedInfrastructure.
    pub infra_retries: u32,
    pub failure: Option<FailureInfo>,
}

impl UpdateRecord {
    pub fn new(
        update_id: Uuid,
        descriptor: UpdateDescriptor,
        rollback_of: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        let payload_checksum = canonical::payload_checksum(&descriptor.payload);
        Self {
            update_id,
            descriptor,
            payload_checksum,
            status: UpdateStatus::Submitted,
            governance_decision: None,
            pending_approval: None,
            signature: None,
            validation: None,
            package: None,
            distribution_event_id: None,
            audit_sequence_numbers: Vec::new(),
            status_history: vec![StatusEntry {
                status: UpdateStatus::Submitted,
                at: now,
            }],
            rollback_of,
            rolled_back_by: None,
            infra_retries: 0,
            failure: None,
        }
    }

    /// Apply an atomic stage commit, enforcing the lifecycle invariants:
    /// legal transitions only, set-once fields, terminal immutability,
    /// append-only history.
    pub fn apply_commit(&mut self, commit: StageCommit) -> Result<(), HubError> {
        if self.status.is_terminal() {
            return Err(HubError::Conflict(format!(
                "update {} is terminal ({}) and cannot be mutated",
                self.update_id, self.status
            )));
        }

        if let Some(next) = commit.status {
            if !self.status.can_transition(next) {
                return Err(HubError::Conflict(format!(
                    "illegal status transition {} -> {} for update {}",
                    self.status, next, self.update_id
                )));
            }
        }

        if let Some(decision) = commit.governance_decision {
            if self.governance_decision.is_some() {
                return Err(HubError::Conflict(
                    "governance_decision is set once".to_string(),
                ));
            }
            self.governance_decision = Some(decision);
        }

        if let Some(resolved_at) = commit.resolve_approval {
            let decision = self.governance_decision.as_mut().ok_or_else(|| {
                HubError::Conflict("cannot resolve approval before governance check".to_string())
            })?;
            if decision.resolved_at.is_some() {
                return Err(HubError::Conflict("approval already resolved".to_string()));
            }
            decision.resolved_at = Some(resolved_at);
            self.pending_approval = None;
        }

        if let Some(marker) = commit.pending_approval {
            self.pending_approval = Some(marker);
        }

        if let Some(signature) = commit.signature {
            if self.signature.is_some() {
                return Err(HubError::Conflict("signature is set once".to_string()));
            }
            self.signature = Some(signature);
        }

        if let Some(validation) = commit.validation {
            if self.validation.is_some() {
                return Err(HubError::Conflict(
                    "validation result is set once".to_string(),
                ));
            }
            self.validation = Some(validation);
        }

        if let Some(package) = commit.package {
            if self.package.is_some() {
                return Err(HubError::Conflict("package is set once".to_string()));
            }
            self.package = Some(package);
        }

        if let Some(event_id) = commit.distribution_event_id {
            if self.distribution_event_id.is_some() {
                return Err(HubError::Conflict(
                    "distribution_event_id is set once".to_string(),
                ));
            }
            self.distribution_event_id = Some(event_id);
        }

        if let Some(seq) = commit.audit_sequence_number {
            self.audit_sequence_numbers.push(seq);
        }

        if let Some(by) = commit.rolled_back_by {
            if self.rolled_back_by.is_some() {
                return Err(HubError::Conflict("already rolled back".to_string()));
            }
            self.rolled_back_by = Some(by);
        }

        if let Some(retries) = commit.infra_retries {
            self.infra_retries = retries;
        }

        if let Some(failure) = commit.failure {
            self.failure = Some(failure);
        }

        if let Some(next) = commit.status {
            self.status = next;
            if next.is_terminal() {
                self.pending_approval = None;
            }
            self.status_history.push(StatusEntry {
                status: next,
                at: commit.at,
            });
        }

        Ok(())
    }

    /// Read-only projection exposed to callers. Built here so internal-only
    /// fields never leak by accident.
    pub fn view(&self) -> UpdateView {
        UpdateView {
            update_id: self.update_id,
            kind: self.descriptor.kind,
            risk_level: self.descriptor.risk_level,
            created_by: self.descriptor.created_by.clone(),
            component_targets: self.descriptor.component_targets.clone(),
            requested_at: self.descriptor.requested_at,
            payload_checksum: self.payload_checksum.clone(),
            status: self.status,
            governance_decision: self.governance_decision.clone(),
            pending_approval: self.pending_approval.clone(),
            signer_identity: self.signature.as_ref().map(|s| s.identity.clone()),
            validation: self.validation.clone(),
            package: self.package.clone(),
            distribution_event_id: self.distribution_event_id.clone(),
            audit_sequence_numbers: self.audit_sequence_numbers.clone(),
            status_history: self.status_history.clone(),
            rollback_of: self.rollback_of,
            rolled_back_by: self.rolled_back_by,
            infra_retries: self.infra_retries,
            failure: self.failure.clone(),
        }
    }
}

// ── Stage commit ───────────────────────────────────────────────

/// One atomic mutation of a record. Exactly the fields a single stage may
/// touch; everything defaults to "unchanged".
#[derive(Debug, Clone)]
pub struct StageCommit {
    /// New status, or `None` for a field-only commit (approval resolution).
    pub status: Option<UpdateStatus>,
    pub at: DateTime<Utc>,
    pub governance_decision: Option<GovernanceDecision>,
    /// Set the pending-approval suspension marker.
    pub pending_approval: Option<String>,
    /// Stamp `resolved_at` on the stored decision and clear the marker.
    pub resolve_approval: Option<DateTime<Utc>>,
    pub signature: Option<SignatureEnvelope>,
    pub validation: Option<ValidationOutcome>,
    pub package: Option<Package>,
    pub distribution_event_id: Option<String>,
    pub audit_sequence_number: Option<u64>,
    pub rolled_back_by: Option<Uuid>,
    pub infra_retries: Option<u32>,
    pub failure: Option<FailureInfo>,
}

impl StageCommit {
    /// Commit advancing to `status` at `at`.
    pub fn to(status: UpdateStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            ..Self::fields_only(at)
        }
    }

    /// Field-only commit (no status change).
    pub fn fields_only(at: DateTime<Utc>) -> Self {
        Self {
            status: None,
            at,
            governance_decision: None,
            pending_approval: None,
            resolve_approval: None,
            signature: None,
            validation: None,
            package: None,
            distribution_event_id: None,
            audit_sequence_number: None,
            rolled_back_by: None,
            infra_retries: None,
            failure: None,
        }
    }
}

// ── Views, filters, stats ──────────────────────────────────────

/// Caller-facing projection of an update record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateView {
    pub update_id: Uuid,
    pub kind: UpdateKind,
    pub risk_level: RiskLevel,
    pub created_by: String,
    pub component_targets: BTreeSet<String>,
    pub requested_at: DateTime<Utc>,
    pub payload_checksum: String,
    pub status: UpdateStatus,
    pub governance_decision: Option<GovernanceDecision>,
    pub pending_approval: Option<String>,
    pub signer_identity: Option<String>,
    pub validation: Option<ValidationOutcome>,
    pub package: Option<Package>,
    pub distribution_event_id: Option<String>,
    pub audit_sequence_numbers: Vec<u64>,
    pub status_history: Vec<StatusEntry>,
    pub rollback_of: Option<Uuid>,
    pub rolled_back_by: Option<Uuid>,
    pub infra_retries: u32,
    pub failure: Option<FailureInfo>,
}

/// Registry listing filter with pagination.
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub kind: Option<UpdateKind>,
    pub status: Option<UpdateStatus>,
    pub submitted_after: Option<DateTime<Utc>>,
    pub submitted_before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            kind: None,
            status: None,
            submitted_after: None,
            submitted_before: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl ListFilter {
    pub fn matches(&self, record: &UpdateRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.descriptor.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(after) = self.submitted_after {
            if record.descriptor.requested_at < after {
                return false;
            }
        }
        if let Some(before) = self.submitted_before {
            if record.descriptor.requested_at >= before {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    /// Distributed-family records over all records that have settled
    /// (distributed or terminal). 1.0 when nothing has settled yet.
    pub success_rate: f64,
}

impl RegistryStats {
    pub fn from_counts(counts: &[(UpdateKind, UpdateStatus, u64)]) -> Self {
        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        let mut total = 0u64;
        let mut succeeded = 0u64;
        let mut settled = 0u64;

        for (kind, status, count) in counts {
            total += count;
            *by_kind.entry(kind.as_str().to_string()).or_default() += count;
            *by_status.entry(status.as_str().to_string()).or_default() += count;
            if status.is_distributed() {
                succeeded += count;
                settled += count;
            } else if status.is_terminal() {
                settled += count;
            }
        }

        let success_rate = if settled == 0 {
            1.0
        } else {
            succeeded as f64 / settled as f64
        };

        Self {
            total,
            by_kind,
            by_status,
            success_rate,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
