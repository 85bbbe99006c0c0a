//! Kinded errors for the envelope boundary.
//!
//! Most code propagates `anyhow::Result` and attaches context; these variants
//! exist so retry logic can classify a failure by downcast instead of
//! scraping strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgusError {
    /// A deadline-bounded call did not complete in time.
    #[error("deadline of {0} ms exceeded")]
    Timeout(u64),

    /// Structured HTTP failure from the LLM provider.
    #[error("upstream LLM error (status {status})")]
    Upstream { status: u16, retryable: bool },

    /// Store-adapter wrap: which operation failed on which collection.
    #[error("store operation '{operation}' failed on '{collection}'")]
    Store {
        operation: String,
        collection: String,
    },
}

impl ArgusError {
    pub fn upstream(status: u16) -> Self {
        Self::Upstream {
            status,
            retryable: matches!(status, 408 | 429 | 500..=599),
        }
    }

    pub fn store(operation: &str, collection: &str) -> Self {
        Self::Store {
            operation: operation.to_string(),
            collection: collection.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Upstream { retryable, .. } => *retryable,
            Self::Store { .. } => false,
        }
    }
}

/// Transport-level failure markers that justify a retry when they surface in
/// an error chain without a typed kind.
const TRANSPORT_MARKERS: [&str; 9] = [
    "connection refused",
    "connect timeout",
    "host not found",
    "dns error",
    "hung up",
    "connection reset",
    "broken pipe",
    "fetch failed",
    "timed out",
];

/// Classify an error as retryable: typed kinds answer directly; anything else
/// is sniffed for recognized transport failures.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(kind) = err.downcast_ref::<ArgusError>() {
        return kind.is_retryable();
    }
    let message = format!("{err:#}").to_lowercase();
    TRANSPORT_MARKERS.iter().any(|m| message.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        assert!(is_retryable(&ArgusError::Timeout(30_000).into()));
    }

    #[test]
    fn test_upstream_classification() {
        assert!(ArgusError::upstream(500).is_retryable());
        assert!(ArgusError::upstream(503).is_retryable());
        assert!(ArgusError::upstream(429).is_retryable());
        assert!(ArgusError::upstream(408).is_retryable());
        assert!(!ArgusError::upstream(400).is_retryable());
        assert!(!ArgusError::upstream(401).is_retryable());
        assert!(!ArgusError::upstream(404).is_retryable());
    }

    #[test]
    fn test_store_never_retryable() {
        assert!(!ArgusError::store("insert", "events").is_retryable());
    }

    #[test]
    fn test_transport_sniffing() {
        let err = anyhow::anyhow!("tcp connect error: Connection refused (os error 111)");
        assert!(is_retryable(&err));
        let err = anyhow::anyhow!("invalid JSON at line 3");
        assert!(!is_retryable(&err));
    }
}
