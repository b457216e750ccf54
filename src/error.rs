//! Error types for counsel-core.

use thiserror::Error;

/// Result type alias using counsel-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pipeline execution.
#[derive(Error, Debug)]
pub enum Error {
    /// Search or LLM provider failed (network, auth, rate limit).
    /// Recoverable: the affected step degrades or falls back.
    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// An entity or claim failed a grounding check. The item is dropped,
    /// never the run.
    #[error("Validation failure: {0}")]
    Validation(String),

    /// A token budget was reached. Soft limit: optional steps are skipped.
    #[error("Budget exhausted: {resource}")]
    BudgetExhausted { resource: String },

    /// The run deadline expired during a step.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Search produced nothing and no fallback content exists. Surfaced to
    /// the caller as a "no information found" response, never a raw error.
    #[error("No information found for query")]
    NoInformation,

    /// Admission was refused because the wait queue is over capacity.
    /// Retryable by the caller.
    #[error("Admission refused: {reason}")]
    AdmissionRefused { reason: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a budget exhausted error.
    pub fn budget_exhausted(resource: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            resource: resource.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an admission refused error.
    pub fn admission_refused(reason: impl Into<String>) -> Self {
        Self::AdmissionRefused {
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the whole request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRefused { .. } | Self::Provider { .. } | Self::Timeout { .. }
        )
    }

    /// Whether the pipeline engine may absorb this error and continue
    /// with the remaining steps.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. }
                | Self::Validation(_)
                | Self::BudgetExhausted { .. }
                | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::admission_refused("queue full").is_retryable());
        assert!(Error::provider("tavily", "503").is_retryable());
        assert!(!Error::NoInformation.is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::validation("missing url").is_recoverable());
        assert!(Error::budget_exhausted("tokens").is_recoverable());
        assert!(!Error::NoInformation.is_recoverable());
    }
}
