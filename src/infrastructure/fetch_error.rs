//! Fetch error taxonomy
//!
//! Transient failures are retried by the fetcher and escalate to terminal
//! once the attempt ceiling is reached. Terminal failures and blocks end the
//! current source only; none of them abort a run.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of interstitial served instead of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Captcha,
    LoginWall,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Captcha => f.write_str("CAPTCHA"),
            Self::LoginWall => f.write_str("login wall"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection or TLS handshake failure; worth another attempt
    #[error("Transient fetch failure for {url}: {message}")]
    Transient { url: String, message: String },

    #[error("Fetch failed for {url}: {message}")]
    Terminal { url: String, message: String },

    #[error("Blocked by {kind} at {url}")]
    Blocked { kind: BlockKind, url: String },
}

impl FetchError {
    pub fn transient(url: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn terminal(url: &str, message: impl Into<String>) -> Self {
        Self::Terminal {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn blocked(kind: BlockKind, url: &str) -> Self {
        Self::Blocked {
            kind,
            url: url.to_string(),
        }
    }

    /// Check if this error is worth retrying
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Turn a transient failure into a terminal one once retries are spent
    #[must_use]
    pub fn escalate(self, attempts: u32) -> Self {
        match self {
            Self::Transient { url, message } => Self::Terminal {
                url,
                message: format!("{message} (gave up after {attempts} attempts)"),
            },
            other => other,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_only_touches_transient() {
        let escalated = FetchError::transient("https://a", "connection reset").escalate(3);
        assert!(matches!(escalated, FetchError::Terminal { ref message, .. } if message.contains("3 attempts")));
        assert!(!escalated.is_retryable());

        let blocked = FetchError::blocked(BlockKind::Captcha, "https://a").escalate(3);
        assert_eq!(blocked, FetchError::blocked(BlockKind::Captcha, "https://a"));
    }

    #[test]
    fn test_display() {
        let err = FetchError::blocked(BlockKind::Captcha, "https://old.reddit.com/r/x");
        assert_eq!(err.to_string(), "Blocked by CAPTCHA at https://old.reddit.com/r/x");
    }
}
