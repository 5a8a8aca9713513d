use thiserror::Error;

/// Error type for the update pipeline.
///
/// Policy rejection and infrastructure failure are distinct variants, never
/// the same shape: a `PolicyRejected` is a judgment and is never retried,
/// while `Infrastructure` is transient and retried with backoff until the
/// configured budget runs out (`RetryExhausted`).
#[derive(Debug, Error)]
pub enum HubError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("policy rejected [{code}]: {reason}")]
    PolicyRejected { code: String, reason: String },

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("retry budget exhausted after {attempts} attempt(s): {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HubError {
    /// Whether a stage-level retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Conflict(_) => 409,
            Self::PolicyRejected { .. } => 422,
            Self::Infrastructure(_) => 503,
            Self::RetryExhausted { .. } => 503,
            Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_not_found() {
        assert_eq!(HubError::NotFound("x".into()).http_status(), 404);
    }

    #[test]
    fn http_status_invalid_input() {
        assert_eq!(HubError::InvalidInput("x".into()).http_status(), 400);
    }

    #[test]
    fn http_status_conflict() {
        assert_eq!(HubError::Conflict("x".into()).http_status(), 409);
    }

    #[test]
    fn http_status_policy_rejected() {
        let e = HubError::PolicyRejected {
            code: "G:POLICY:DENIED".into(),
            reason: "no".into(),
        };
        assert_eq!(e.http_status(), 422);
    }

    #[test]
    fn http_status_infrastructure() {
        assert_eq!(HubError::Infrastructure("down".into()).http_status(), 503);
    }

    #[test]
    fn http_status_internal() {
        let e = HubError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn only_infrastructure_is_retryable() {
        assert!(HubError::Infrastructure("down".into()).is_retryable());
        assert!(!HubError::NotFound("x".into()).is_retryable());
        assert!(!HubError::PolicyRejected {
            code: "G:POLICY:DENIED".into(),
            reason: "no".into()
        }
        .is_retryable());
        assert!(!HubError::RetryExhausted {
            attempts: 5,
            last_error: "down".into()
        }
        .is_retryable());
    }

    #[test]
    fn display_policy_rejected_carries_code() {
        let e = HubError::PolicyRejected {
            code: "V:VALIDATION:FAILED".into(),
            reason: "2 diagnostics".into(),
        };
        assert_eq!(
            e.to_string(),
            "policy rejected [V:VALIDATION:FAILED]: 2 diagnostics"
        );
    }
}
