//! Canonical serialization and content hashing.
//!
//! Algorithm:
//!   1. Serialize through `serde_json::Value` (object keys sort lexically)
//!   2. Render compact (no whitespace)
//!   3. Hash: SHA-256 of ("v1:" + rendered form), hex-encoded
//!
//! The checksum is a pure function of the payload, so any party holding the
//! descriptor can verify package integrity without trusting the orchestrator.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::HubError;

/// Current hash version prefix, included in the hash input.
pub const HASH_VERSION: &str = "v1";

/// Render a JSON value in canonical form: compact, keys sorted.
pub fn canonical_json(value: &serde_json::Value) -> String {
    // serde_json::Value maps are BTreeMap-backed, so rendering is already
    // key-sorted and deterministic.
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Checksum over the canonical rendering of an update payload.
pub fn payload_checksum(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{HASH_VERSION}:").as_bytes());
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Bytes covered by the record signature: the canonical serialization of the
/// descriptor together with the governance decision. Signing before the
/// governance stage completes is impossible by construction — there is no
/// decision to serialize.
pub fn sign_bytes<D: Serialize, G: Serialize>(
    descriptor: &D,
    decision: &G,
) -> Result<Vec<u8>, HubError> {
    let envelope = serde_json::json!({
        "descriptor": serde_json::to_value(descriptor)
            .map_err(|e| HubError::InvalidInput(format!("descriptor not serializable: {e}")))?,
        "governance_decision": serde_json::to_value(decision)
            .map_err(|e| HubError::InvalidInput(format!("decision not serializable: {e}")))?,
    });
    Ok(canonical_json(&envelope).into_bytes())
}

/// Truncated canonical rendering handed to the governance oracle. The oracle
/// judges shape and provenance, never the full payload.
pub fn payload_summary(payload: &serde_json::Value, max_chars: usize) -> String {
    let rendered = canonical_json(payload);
    if rendered.chars().count() <= max_chars {
        return rendered;
    }
    let truncated: String = rendered.chars().take(max_chars).collect();
    format!("{truncated}…")
}
