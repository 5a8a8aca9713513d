//! Structured reason-code constants for the update pipeline.
//!
//! Format: `{STAGE}:{CATEGORY}:{CODE}`
//!   G:*     — stage 1 (governance check / approval suspension)
//!   V:*     — stage 4 (validation), including the per-kind validator codes
//!   PKG:*   — stage 5 (packaging)
//!   WD:*    — rollback triggers (manual request or watchdog anomaly)
//!   INFRA:* — stage-level retry exhaustion (no policy judgment implied)

// ── Governance (G:*) ───────────────────────────────────────────

/// Oracle returned DENY.
pub const G_POLICY_DENIED: &str = "G:POLICY:DENIED";
/// High-risk conditional approval came back without a trackable reference.
pub const G_APPROVAL_MISSING_REF: &str = "G:APPROVAL:MISSING_REF";
/// Pending approval explicitly aborted by an operator.
pub const G_APPROVAL_ABORTED: &str = "G:APPROVAL:ABORTED";
/// Pending approval not resolved within the configured abandonment window.
pub const G_APPROVAL_ABANDONED: &str = "G:APPROVAL:ABANDONED";

// ── Validation (V:*) ───────────────────────────────────────────

/// Umbrella code for a failed validation outcome.
pub const V_VALIDATION_FAILED: &str = "V:VALIDATION:FAILED";
/// Sandboxed execution exceeded its bound. A risk signal, not an
/// infrastructure failure.
pub const V_EXEC_TIMEOUT: &str = "V:EXEC:TIMEOUT";
/// No validator registered for the update kind.
pub const V_POOL_UNREGISTERED: &str = "V:POOL:UNREGISTERED";

/// Payload is not a JSON object.
pub const V_PAYLOAD_NOT_OBJECT: &str = "V:PAYLOAD:NOT_OBJECT";
/// Rollback-instruction payload failed structural checks.
pub const V_ROLLBACK_MALFORMED: &str = "V:ROLLBACK:MALFORMED";

/// Schema payload missing the proposed schema.
pub const V_SCHEMA_PROPOSED_MISSING: &str = "V:SCHEMA:PROPOSED_MISSING";
/// Proposed schema is identical to the current snapshot.
pub const V_SCHEMA_DIFF_EMPTY: &str = "V:SCHEMA:DIFF_EMPTY";
/// Module source map is empty or has non-string sources.
pub const V_CODE_SOURCE_MAP_INVALID: &str = "V:CODE:SOURCE_MAP_INVALID";
/// Module source failed the compile check.
pub const V_CODE_COMPILE_FAILED: &str = "V:CODE:COMPILE_FAILED";
/// Module failed its sandboxed execution run.
pub const V_CODE_EXEC_FAILED: &str = "V:CODE:EXEC_FAILED";
/// Playbook has no steps, or a step is missing its action.
pub const V_PLAYBOOK_STRUCTURE_INVALID: &str = "V:PLAYBOOK:STRUCTURE_INVALID";
/// Config diff is empty or has empty keys.
pub const V_CONFIG_DIFF_INVALID: &str = "V:CONFIG:DIFF_INVALID";
/// Metric definition missing its name or expression.
pub const V_METRIC_DEFINITION_INVALID: &str = "V:METRIC:DEFINITION_INVALID";

// ── Packaging (PKG:*) ──────────────────────────────────────────

/// Descriptor declared no component targets.
pub const PKG_TARGETS_EMPTY: &str = "PKG:TARGETS:EMPTY";

// ── Rollback triggers (WD:*) ───────────────────────────────────

/// Manual rollback request from a caller.
pub const WD_ROLLBACK_REQUESTED: &str = "WD:ROLLBACK:REQUESTED";
/// Watchdog anomaly callback triggered the rollback.
pub const WD_ANOMALY_TRIGGERED: &str = "WD:ANOMALY:TRIGGERED";

// ── Infrastructure (INFRA:*) ───────────────────────────────────

/// Stage retry budget exhausted; the record reflects no policy judgment.
pub const INFRA_RETRY_EXHAUSTED: &str = "INFRA:RETRY:EXHAUSTED";

// ── Audit event types ──────────────────────────────────────────

/// Stage 3 proposal event.
pub const EVENT_PROPOSED: &str = "update_proposed";
/// Stage 7 completion event.
pub const EVENT_DISTRIBUTED: &str = "update_distributed";
/// Terminal rejection event (governance deny, validation fail, approval
/// abort/abandonment).
pub const EVENT_REJECTED: &str = "update_rejected";
/// Original record flipped after its rollback distributed.
pub const EVENT_ROLLED_BACK: &str = "update_rolled_back";
/// A rollback of this update was requested (manual or anomaly-triggered).
pub const EVENT_ROLLBACK_REQUESTED: &str = "update_rollback_requested";
/// Inbound watchdog anomaly accepted.
pub const EVENT_ANOMALY: &str = "update_anomaly";
