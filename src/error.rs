//! Error types for the research coordinator.

use std::collections::HashMap;
use thiserror::Error;

/// Result type alias using the coordinator's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a research session.
///
/// Variants map to the failure kinds the coordinator distinguishes when
/// deciding whether to retry, fall back, salvage partial output, or give up.
#[derive(Error, Debug)]
pub enum Error {
    /// Network/timeout/rate-limit/5xx failure from a source adapter or LLM call.
    /// Retryable with exponential backoff up to a configured limit.
    #[error("transient transport error: {message}")]
    TransportTransient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 4xx auth/forbidden/not-found/invalid-request failure. Not retryable.
    #[error("terminal transport error ({status}): {message}")]
    TransportTerminal { status: u16, message: String },

    /// Writer stream ended early but enough content accumulated to salvage.
    #[error("partial content accumulated ({chars_accumulated} chars) before interruption")]
    PartialContent { chars_accumulated: usize },

    /// A structured LLM response failed schema validation or parsing.
    #[error("structured output from {component} failed validation: {message}")]
    LlmStructural { component: String, message: String },

    /// Fewer than the required number of sources succeeded and the fallback
    /// chain was exhausted. Fatal for the search, fatal for the workflow.
    #[error("aggregation failed: only {succeeded}/{attempted} sources succeeded ({})",
        per_source.iter().map(|(s, e)| format!("{s}: {e}")).collect::<Vec<_>>().join("; "))]
    AggregationInsufficient {
        succeeded: usize,
        attempted: usize,
        per_source: HashMap<String, String>,
    },

    /// Client-initiated stop. Terminal, not an error condition beyond `reason`.
    #[error("session cancelled: {reason}")]
    Cancelled { reason: String },

    /// Internal consistency violation (dangling paper id, inconsistent
    /// memory state, etc). Fatal; logged with detail, reported generically.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Generic LLM-layer failure (HTTP, parsing) that hasn't been
    /// classified into transient/terminal yet.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn transport_transient(message: impl Into<String>) -> Self {
        Self::TransportTransient {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransportTransient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn transport_terminal(status: u16, message: impl Into<String>) -> Self {
        Self::TransportTerminal {
            status,
            message: message.into(),
        }
    }

    pub fn partial_content(chars_accumulated: usize) -> Self {
        Self::PartialContent { chars_accumulated }
    }

    pub fn llm_structural(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmStructural {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn aggregation_insufficient(
        succeeded: usize,
        attempted: usize,
        per_source: HashMap<String, String>,
    ) -> Self {
        Self::AggregationInsufficient {
            succeeded,
            attempted,
            per_source,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Whether this error is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportTransient { .. } => true,
            Self::Llm(message) => Self::message_is_retryable(message),
            _ => false,
        }
    }

    fn message_is_retryable(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
            || lower.contains("temporarily unavailable")
            || lower.contains("timeout")
    }

    /// Concise, user-facing category for a failure, independent of its cause chain.
    pub fn user_category(&self) -> UserFailureCategory {
        match self {
            Self::Cancelled { .. } => UserFailureCategory::Aborted,
            Self::TransportTransient { message, .. } | Self::Llm(message) => {
                let lower = message.to_ascii_lowercase();
                if lower.contains("timeout") {
                    UserFailureCategory::Timeout
                } else if Self::message_is_retryable(&lower) {
                    UserFailureCategory::RateLimit
                } else if lower.contains("network") || lower.contains("connection") {
                    UserFailureCategory::Network
                } else {
                    UserFailureCategory::Unknown
                }
            }
            Self::TransportTerminal { status, .. } => {
                if *status == 401 || *status == 403 {
                    UserFailureCategory::Auth
                } else {
                    UserFailureCategory::Unknown
                }
            }
            Self::PartialContent { .. } => UserFailureCategory::Aborted,
            _ => UserFailureCategory::Unknown,
        }
    }
}

/// The small set of categories surfaced to end users when a session fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFailureCategory {
    Aborted,
    Network,
    Timeout,
    RateLimit,
    Auth,
    Unknown,
}

impl std::fmt::Display for UserFailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Aborted => "aborted",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate-limit",
            Self::Auth => "auth",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(Error::transport_transient("boom").is_retryable());
        assert!(!Error::invariant("bad state").is_retryable());
    }

    #[test]
    fn user_category_classifies_timeout() {
        let err = Error::llm("request timeout after 30s");
        assert_eq!(err.user_category(), UserFailureCategory::Timeout);
    }

    #[test]
    fn user_category_classifies_auth() {
        let err = Error::transport_terminal(401, "unauthorized");
        assert_eq!(err.user_category(), UserFailureCategory::Auth);
    }

    #[test]
    fn cancelled_is_aborted() {
        let err = Error::cancelled("client stop");
        assert_eq!(err.user_category(), UserFailureCategory::Aborted);
    }
}
