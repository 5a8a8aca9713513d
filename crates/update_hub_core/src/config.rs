//! Pipeline configuration. Plain struct, injected at construction — no
//! process-wide state.

use std::time::Duration;

use crate::types::RiskLevel;

/// Operator-tunable knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempts per stage before an infrastructure failure becomes
    /// FailedInfrastructure. Includes the first attempt.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Ceiling on any single retry delay.
    pub backoff_cap: Duration,
    /// Validation bound for low-risk updates (structural checks only).
    pub validation_timeout_low: Duration,
    /// Validation bound for medium-risk updates (adds diff/compile checks).
    pub validation_timeout_medium: Duration,
    /// Validation bound for high-risk updates (full sandboxed run).
    pub validation_timeout_high: Duration,
    /// How long a high-risk conditional approval may stay pending before the
    /// record is auto-rejected.
    pub approval_abandon_after: Duration,
    /// Post-distribution observation window handed to the watchdog.
    pub observation_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_secs(2),
            validation_timeout_low: Duration::from_secs(2),
            validation_timeout_medium: Duration::from_secs(10),
            validation_timeout_high: Duration::from_secs(60),
            approval_abandon_after: Duration::from_secs(72 * 3600),
            observation_window: Duration::from_secs(24 * 3600),
        }
    }
}

impl PipelineConfig {
    /// Validation bound for the given risk tier.
    pub fn validation_timeout(&self, risk: RiskLevel) -> Duration {
        match risk {
            RiskLevel::Low => self.validation_timeout_low,
            RiskLevel::Medium => self.validation_timeout_medium,
            RiskLevel::High => self.validation_timeout_high,
        }
    }

    /// Delay before retry number `attempt` (1-based: the delay after the
    /// first failed attempt is `backoff_base`).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << shift);
        delay.min(self.backoff_cap)
    }
}
