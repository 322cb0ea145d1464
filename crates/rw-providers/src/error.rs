use std::fmt;
use std::time::Duration;

use rw_core::text::truncate_utf8;
use thiserror::Error;

/// Longest raw body excerpt carried in an error.
pub const EXCERPT_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection, DNS, TLS, or a body read that died midway.
    Network,
    /// The backend answered with a non-success status.
    Http,
    /// The body did not match the backend's documented shape.
    Malformed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Network => write!(f, "network"),
            FailureKind::Http => write!(f, "http"),
            FailureKind::Malformed => write!(f, "malformed response"),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Failure of a call to an LLM backend. Adapters never retry; the caller
/// decides using [`ProviderError::is_retryable`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: {kind} error{}: {excerpt}", status_suffix(.status))]
    Backend {
        provider: String,
        kind: FailureKind,
        status: Option<u16>,
        /// At most [`EXCERPT_LIMIT`] bytes of the raw body or error text.
        excerpt: String,
    },

    #[error("{provider}: request timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider}: unsupported: {what}")]
    Unsupported { provider: String, what: String },
}

impl ProviderError {
    pub fn network(provider: &str, detail: impl fmt::Display) -> Self {
        ProviderError::Backend {
            provider: provider.to_string(),
            kind: FailureKind::Network,
            status: None,
            excerpt: truncate_utf8(&detail.to_string(), EXCERPT_LIMIT),
        }
    }

    pub fn http(provider: &str, status: u16, body: &str) -> Self {
        ProviderError::Backend {
            provider: provider.to_string(),
            kind: FailureKind::Http,
            status: Some(status),
            excerpt: truncate_utf8(body, EXCERPT_LIMIT),
        }
    }

    pub fn malformed(provider: &str, detail: impl fmt::Display) -> Self {
        ProviderError::Backend {
            provider: provider.to_string(),
            kind: FailureKind::Malformed,
            status: None,
            excerpt: truncate_utf8(&detail.to_string(), EXCERPT_LIMIT),
        }
    }

    pub fn timeout(provider: &str, after: Duration) -> Self {
        ProviderError::Timeout {
            provider: provider.to_string(),
            secs: after.as_secs(),
        }
    }

    pub fn unsupported(provider: &str, what: impl Into<String>) -> Self {
        ProviderError::Unsupported {
            provider: provider.to_string(),
            what: what.into(),
        }
    }

    /// Map a transport error. `timeout` is the deadline that was applied.
    pub fn from_reqwest(provider: &str, err: reqwest::Error, timeout: Option<Duration>) -> Self {
        if err.is_timeout() {
            ProviderError::timeout(provider, timeout.unwrap_or_default())
        } else if err.is_decode() {
            ProviderError::malformed(provider, err)
        } else {
            ProviderError::network(provider, err)
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Backend { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Unsupported { provider, .. } => provider,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Backend { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }

    /// Transient failures worth another attempt: network errors, timeouts,
    /// rate limiting, and server-side 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } => true,
            ProviderError::Backend {
                kind: FailureKind::Network,
                ..
            } => true,
            ProviderError::Backend {
                kind: FailureKind::Http,
                status: Some(s),
                ..
            } => *s == 429 || *s >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_is_bounded() {
        let body = "x".repeat(4096);
        let err = ProviderError::http("openai", 500, &body);
        match &err {
            ProviderError::Backend { excerpt, .. } => assert!(excerpt.len() <= EXCERPT_LIMIT + 3),
            _ => unreachable!(),
        }
        assert!(err.to_string().starts_with("openai: http error (status 500): "));
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::http("a", 429, "").is_retryable());
        assert!(ProviderError::http("a", 503, "").is_retryable());
        assert!(!ProviderError::http("a", 401, "").is_retryable());
        assert!(!ProviderError::malformed("a", "eof").is_retryable());
        assert!(ProviderError::network("a", "refused").is_retryable());
        assert!(ProviderError::timeout("a", Duration::from_secs(5)).is_retryable());
        assert!(!ProviderError::unsupported("a", "x").is_retryable());
    }
}
