use thiserror::Error;

/// Top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum DevDocsError {
    // --- Client errors ---
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // --- Hard dependency errors (surfaced to the caller) ---
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    // --- Soft dependency errors (degrade, never surfaced) ---
    #[error("Cache backend error: {0}")]
    CacheBackend(String),

    // --- Operational errors ---
    #[error("Circuit breaker open for {dependency} (retry in {time_until_retry:.1}s)")]
    CircuitOpen {
        dependency: String,
        time_until_retry: f64,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl DevDocsError {
    /// Whether this error is the caller's fault rather than the system's.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Whether this error should be retried at a higher level
    /// (transient unavailability rather than a definitive failure).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LlmUnavailable(_)
                | Self::VectorStoreUnavailable(_)
                | Self::CircuitOpen { .. }
                | Self::Timeout(_)
        )
    }

    /// Message safe to return to an external caller. Internal errors are
    /// collapsed to an opaque string; everything else displays as-is since
    /// the constructors never embed connection strings or paths.
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Serialization(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DevDocsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = DevDocsError::Internal("pool handle 0x7f poisoned at store.rs:88".into());
        assert_eq!(err.sanitized_message(), "internal server error");
    }

    #[test]
    fn test_client_vs_transient_classification() {
        assert!(DevDocsError::InvalidInput("empty".into()).is_client_error());
        assert!(!DevDocsError::InvalidInput("empty".into()).is_transient());
        assert!(DevDocsError::Timeout("llm call".into()).is_transient());
        assert!(DevDocsError::CircuitOpen {
            dependency: "postgres".into(),
            time_until_retry: 12.0
        }
        .is_transient());
    }
}
