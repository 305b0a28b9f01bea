//! Error types for the generation pipeline.
//!
//! `ProviderError` lives here rather than in `questgen-providers` so the
//! engine can downcast provider failures and classify them for retry
//! decisions without string matching.

use thiserror::Error;

use crate::candidate::{Rejection, ValidationStage};

/// Errors raised by distribution, planning and task execution.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Malformed distribution or blueprint input. Fatal to the call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A completion or storage call failed.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// A candidate failed one of the validation stages.
    #[error("rejected at {stage} stage: {reason}")]
    ValidationRejected {
        stage: ValidationStage,
        reason: String,
    },

    /// A task could not be satisfied within its retry budget.
    #[error("plan exhausted for {sub_skill} after {attempts} attempt(s): {reason}")]
    PlanExhausted {
        sub_skill: String,
        attempts: u32,
        reason: String,
    },
}

impl GenerationError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        GenerationError::InvalidArgument(message.into())
    }
}

/// A stage rejection becomes `ValidationRejected`; a candidate dropped
/// outside the stages (failed insert) is an external failure.
impl From<&Rejection> for GenerationError {
    fn from(rejection: &Rejection) -> Self {
        match rejection.stage {
            Some(stage) => GenerationError::ValidationRejected {
                stage,
                reason: rejection.reason.clone(),
            },
            None => GenerationError::ExternalService(rejection.reason.clone()),
        }
    }
}

/// Errors that can occur when interacting with an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthenticationFailed(_) | ProviderError::ModelNotFound(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Look for a `ProviderError` anywhere in an `anyhow` error chain.
pub fn provider_error(err: &anyhow::Error) -> Option<&ProviderError> {
    err.chain().find_map(|e| e.downcast_ref::<ProviderError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors() {
        assert!(ProviderError::AuthenticationFailed("bad".into()).is_permanent());
        assert!(ProviderError::ModelNotFound("x".into()).is_permanent());
        assert!(!ProviderError::Timeout(5).is_permanent());
        assert!(!ProviderError::RateLimited {
            retry_after_ms: 10
        }
        .is_permanent());
    }

    #[test]
    fn provider_error_found_through_context() {
        let err = anyhow::Error::new(ProviderError::RateLimited {
            retry_after_ms: 2500,
        })
        .context("generating question");
        let found = provider_error(&err).expect("provider error in chain");
        assert_eq!(found.retry_after_ms(), Some(2500));
    }

    #[test]
    fn rejection_message_names_stage() {
        let err = GenerationError::from(&Rejection {
            stage: Some(ValidationStage::Duplicate),
            reason: "duplicate of an existing item".into(),
        });
        assert!(matches!(
            err,
            GenerationError::ValidationRejected {
                stage: ValidationStage::Duplicate,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "rejected at duplicate stage: duplicate of an existing item"
        );
    }

    #[test]
    fn discarded_candidate_is_an_external_failure() {
        let err = GenerationError::from(&Rejection {
            stage: None,
            reason: "insert failed: disk full".into(),
        });
        assert_eq!(err.to_string(), "external service error: insert failed: disk full");
    }
}
