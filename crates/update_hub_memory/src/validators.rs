//! Per-kind update validators with risk-scaled depth.
//!
//! Low risk gets structural checks only; medium adds diff/compile checks;
//! high adds the full (bounded) execution checks. The orchestrator enforces
//! the wall-clock bound around each call — validators here just do the work.
//!
//! Every validator also accepts rollback-instruction payloads: a rollback
//! record carries its original's rollback steps as payload and flows through
//! the same validation stage as everything else.

use std::sync::Arc;

use async_trait::async_trait;

use update_hub_core::codes;
use update_hub_core::package::rollback_instructions;
use update_hub_core::ports::{Result, UpdateValidator, ValidatorPool};
use update_hub_core::types::{Diagnostic, RiskLevel, UpdateKind, ValidationOutcome};

/// Build the complete registration table: one validator per kind. The match
/// below is exhaustive, so adding a kind without a validator fails to
/// compile.
pub fn standard_pool() -> ValidatorPool {
    let mut pool = ValidatorPool::new();
    for kind in UpdateKind::ALL {
        let validator: Arc<dyn UpdateValidator> = match kind {
            UpdateKind::Schema => Arc::new(SchemaDiffValidator),
            UpdateKind::CodeModule => Arc::new(CodeModuleValidator),
            UpdateKind::Playbook => Arc::new(PlaybookValidator),
            UpdateKind::Config => Arc::new(ConfigValidator),
            UpdateKind::MetricDefinition => Arc::new(MetricDefinitionValidator),
        };
        pool = pool.register(kind, validator);
    }
    pool
}

// ── Shared helpers ─────────────────────────────────────────────

/// If the payload is shaped like rollback instructions, validate that shape
/// and short-circuit the kind-specific checks.
fn rollback_outcome(payload: &serde_json::Value) -> Option<ValidationOutcome> {
    let map = payload.as_object()?;
    if map.is_empty() {
        return None;
    }
    let instruction_shaped = map.values().all(|v| {
        v.get("action")
            .and_then(|a| a.as_str())
            .map(|a| a == "restore" || a == "remove")
            .unwrap_or(false)
    });
    if !instruction_shaped {
        return None;
    }

    match rollback_instructions(payload) {
        Some(_) => Some(ValidationOutcome::pass_with(vec![])),
        None => Some(ValidationOutcome::fail_with(vec![Diagnostic::error(
            codes::V_ROLLBACK_MALFORMED,
            "payload looks like rollback instructions but fails to parse",
        )])),
    }
}

fn not_object(payload: &serde_json::Value) -> Option<ValidationOutcome> {
    if payload.is_object() {
        None
    } else {
        Some(ValidationOutcome::fail_with(vec![Diagnostic::error(
            codes::V_PAYLOAD_NOT_OBJECT,
            "payload must be a JSON object",
        )]))
    }
}

fn outcome_from(diagnostics: Vec<Diagnostic>) -> ValidationOutcome {
    let failed = diagnostics
        .iter()
        .any(|d| d.severity == update_hub_core::types::DiagnosticSeverity::Error);
    if failed {
        ValidationOutcome::fail_with(diagnostics)
    } else {
        ValidationOutcome::pass_with(diagnostics)
    }
}

// ── Schema ─────────────────────────────────────────────────────

/// Structural diff validator for schema updates. Expects a payload with a
/// `proposed` schema object and an optional `current` snapshot.
pub struct SchemaDiffValidator;

#[async_trait]
impl UpdateValidator for SchemaDiffValidator {
    async fn validate(
        &self,
        payload: &serde_json::Value,
        risk_level: RiskLevel,
    ) -> Result<ValidationOutcome> {
        if let Some(outcome) = not_object(payload) {
            return Ok(outcome);
        }
        if let Some(outcome) = rollback_outcome(payload) {
            return Ok(outcome);
        }

        let mut diagnostics = Vec::new();

        let proposed = payload.get("proposed");
        match proposed {
            Some(p) if p.is_object() => {}
            _ => {
                diagnostics.push(Diagnostic::error(
                    codes::V_SCHEMA_PROPOSED_MISSING,
                    "schema payload must carry a 'proposed' object",
                ));
                return Ok(outcome_from(diagnostics));
            }
        }

        if risk_level >= RiskLevel::Medium {
            if let Some(current) = payload.get("current") {
                if !current.is_null() && current == proposed.unwrap() {
                    diagnostics.push(Diagnostic::error(
                        codes::V_SCHEMA_DIFF_EMPTY,
                        "proposed schema is identical to the current snapshot",
                    ));
                }
            }
        }

        if risk_level == RiskLevel::High {
            // The deep pass applies the proposed schema object-by-object.
            let proposed_map = proposed.and_then(|p| p.as_object()).unwrap();
            for (name, definition) in proposed_map {
                if !definition.is_object() {
                    diagnostics.push(Diagnostic::error(
                        codes::V_SCHEMA_PROPOSED_MISSING,
                        format!("schema object '{name}' must be an object definition"),
                    ));
                }
            }
        }

        Ok(outcome_from(diagnostics))
    }
}

// ── Code module ────────────────────────────────────────────────

/// Validator for behavioral code modules. The payload is a source map:
/// path → module source.
pub struct CodeModuleValidator;

/// Per-file delimiter balance scan — the compile check stand-in.
fn scan_delimiters(source: &str) -> bool {
    let mut stack = Vec::new();
    for c in source.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

#[async_trait]
impl UpdateValidator for CodeModuleValidator {
    async fn validate(
        &self,
        payload: &serde_json::Value,
        risk_level: RiskLevel,
    ) -> Result<ValidationOutcome> {
        if let Some(outcome) = not_object(payload) {
            return Ok(outcome);
        }
        if let Some(outcome) = rollback_outcome(payload) {
            return Ok(outcome);
        }

        let map = payload.as_object().unwrap();
        let mut diagnostics = Vec::new();

        if map.is_empty() {
            diagnostics.push(Diagnostic::error(
                codes::V_CODE_SOURCE_MAP_INVALID,
                "module source map is empty",
            ));
            return Ok(outcome_from(diagnostics));
        }

        for (path, source) in map {
            let Some(source) = source.as_str() else {
                diagnostics.push(Diagnostic::error(
                    codes::V_CODE_SOURCE_MAP_INVALID,
                    format!("source for '{path}' must be a string"),
                ));
                continue;
            };

            if risk_level >= RiskLevel::Medium && !scan_delimiters(source) {
                diagnostics.push(Diagnostic::error(
                    codes::V_CODE_COMPILE_FAILED,
                    format!("unbalanced delimiters in '{path}'"),
                ));
            }

            if risk_level == RiskLevel::High {
                for marker in ["unimplemented!", "todo!"] {
                    if source.contains(marker) {
                        diagnostics.push(Diagnostic::error(
                            codes::V_CODE_EXEC_FAILED,
                            format!("'{path}' hit {marker} during the sandboxed run"),
                        ));
                    }
                }
            }
        }

        Ok(outcome_from(diagnostics))
    }
}

// ── Playbook ───────────────────────────────────────────────────

/// Structure validator for remediation playbooks: a name plus a non-empty
/// list of steps, each with an action.
pub struct PlaybookValidator;

#[async_trait]
impl UpdateValidator for PlaybookValidator {
    async fn validate(
        &self,
        payload: &serde_json::Value,
        risk_level: RiskLevel,
    ) -> Result<ValidationOutcome> {
        if let Some(outcome) = not_object(payload) {
            return Ok(outcome);
        }
        if let Some(outcome) = rollback_outcome(payload) {
            return Ok(outcome);
        }

        let mut diagnostics = Vec::new();

        let name_ok = payload
            .get("name")
            .and_then(|n| n.as_str())
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false);
        if !name_ok {
            diagnostics.push(Diagnostic::error(
                codes::V_PLAYBOOK_STRUCTURE_INVALID,
                "playbook must have a non-empty name",
            ));
        }

        match payload.get("steps").and_then(|s| s.as_array()) {
            Some(steps) if !steps.is_empty() => {
                for (i, step) in steps.iter().enumerate() {
                    let action_ok = step
                        .get("action")
                        .and_then(|a| a.as_str())
                        .map(|a| !a.trim().is_empty())
                        .unwrap_or(false);
                    if !action_ok {
                        diagnostics.push(Diagnostic::error(
                            codes::V_PLAYBOOK_STRUCTURE_INVALID,
                            format!("step {i} is missing its action"),
                        ));
                    }

                    if risk_level >= RiskLevel::Medium {
                        if let Some(timeout) = step.get("timeout_secs") {
                            if timeout.as_u64().unwrap_or(0) == 0 {
                                diagnostics.push(Diagnostic::error(
                                    codes::V_PLAYBOOK_STRUCTURE_INVALID,
                                    format!("step {i} has a non-positive timeout"),
                                ));
                            }
                        }
                    }
                }
            }
            _ => {
                diagnostics.push(Diagnostic::error(
                    codes::V_PLAYBOOK_STRUCTURE_INVALID,
                    "playbook must have a non-empty steps array",
                ));
            }
        }

        Ok(outcome_from(diagnostics))
    }
}

// ── Config ─────────────────────────────────────────────────────

/// Diff validator for configuration values: a non-empty object of settings.
pub struct ConfigValidator;

#[async_trait]
impl UpdateValidator for ConfigValidator {
    async fn validate(
        &self,
        payload: &serde_json::Value,
        risk_level: RiskLevel,
    ) -> Result<ValidationOutcome> {
        if let Some(outcome) = not_object(payload) {
            return Ok(outcome);
        }
        if let Some(outcome) = rollback_outcome(payload) {
            return Ok(outcome);
        }

        let map = payload.as_object().unwrap();
        let mut diagnostics = Vec::new();

        if map.is_empty() {
            diagnostics.push(Diagnostic::error(
                codes::V_CONFIG_DIFF_INVALID,
                "config diff is empty",
            ));
        }

        for (key, value) in map {
            if key.trim().is_empty() {
                diagnostics.push(Diagnostic::error(
                    codes::V_CONFIG_DIFF_INVALID,
                    "config keys must be non-empty",
                ));
            }
            if risk_level >= RiskLevel::Medium && value.is_null() {
                diagnostics.push(Diagnostic::error(
                    codes::V_CONFIG_DIFF_INVALID,
                    format!("config key '{key}' is null — unsets must be explicit removes"),
                ));
            }
        }

        Ok(outcome_from(diagnostics))
    }
}

// ── Metric definition ──────────────────────────────────────────

/// Validator for metric definitions: a named definition with an expression.
pub struct MetricDefinitionValidator;

#[async_trait]
impl UpdateValidator for MetricDefinitionValidator {
    async fn validate(
        &self,
        payload: &serde_json::Value,
        risk_level: RiskLevel,
    ) -> Result<ValidationOutcome> {
        if let Some(outcome) = not_object(payload) {
            return Ok(outcome);
        }
        if let Some(outcome) = rollback_outcome(payload) {
            return Ok(outcome);
        }

        let mut diagnostics = Vec::new();

        let name_ok = payload
            .get("name")
            .and_then(|n| n.as_str())
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false);
        if !name_ok {
            diagnostics.push(Diagnostic::error(
                codes::V_METRIC_DEFINITION_INVALID,
                "metric definition must have a non-empty name",
            ));
        }

        if risk_level >= RiskLevel::Medium {
            let has_expression = ["expression", "query", "definition"]
                .iter()
                .any(|field| payload.get(field).is_some());
            if !has_expression {
                diagnostics.push(Diagnostic::error(
                    codes::V_METRIC_DEFINITION_INVALID,
                    "metric definition must carry an expression, query, or definition",
                ));
            }
        }

        Ok(outcome_from(diagnostics))
    }
}

// ── Tests ──────────────────────────────────────────────────────
