//! Bounded retry with linear backoff for update checks and downloads

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Retry policy for update operations
///
/// Attempt `n` (1-based) that fails with attempts remaining waits
/// `n * backoff_step` before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff increment per attempt
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with at least one attempt
    #[must_use]
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
        }
    }

    /// Delay after failed attempt `attempt`, or `None` if it was the last
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.backoff_step.saturating_mul(attempt))
    }
}

/// Category of an update failure, used to pick the user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No network at all
    NoConnectivity,
    /// Network up, update host cannot be resolved or reached
    HostUnreachable,
    Timeout,
    /// Feed or artifact missing on the server
    NotFound,
    /// Downloaded artifact does not match its published digest
    Integrity,
    Generic,
}

impl FailureKind {
    /// Classify a raw error message
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("err_internet_disconnected") || lower.contains("network is unreachable") {
            Self::NoConnectivity
        } else if lower.contains("err_name_not_resolved")
            || lower.contains("enotfound")
            || lower.contains("dns error")
            || lower.contains("failed to lookup address")
        {
            Self::HostUnreachable
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("404") {
            Self::NotFound
        } else {
            Self::Generic
        }
    }

    /// Human-readable message for a final failure of this kind
    #[must_use]
    pub fn describe(self, message: &str) -> String {
        match self {
            Self::NoConnectivity => {
                "No internet connection - check your connection and try again later".to_string()
            }
            Self::HostUnreachable => {
                "Update server unreachable - check your network connection".to_string()
            }
            Self::Timeout => "Update server timed out - it may be overloaded".to_string(),
            Self::NotFound => "Update file not found on the server".to_string(),
            Self::Integrity => {
                "Downloaded update failed verification - it was discarded".to_string()
            }
            Self::Generic => format!("Update failed: {message}"),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoConnectivity => "no_connectivity",
            Self::HostUnreachable => "host_unreachable",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::Integrity => "integrity",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// A failed update check, download or install
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpdateFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl UpdateFailure {
    /// Build a failure with an explicit kind
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build a failure classified from its message
    #[must_use]
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    /// Message shown to the user once retries are exhausted
    #[must_use]
    pub fn describe(&self) -> String {
        self.kind.describe(&self.message)
    }
}

impl From<reqwest::Error> for UpdateFailure {
    fn from(e: reqwest::Error) -> Self {
        let message = e.to_string();
        let kind = if e.is_timeout() {
            FailureKind::Timeout
        } else if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            FailureKind::NotFound
        } else {
            match FailureKind::classify(&format!("{e:?}")) {
                FailureKind::Generic if e.is_connect() => FailureKind::NoConnectivity,
                kind => kind,
            }
        };
        Self { kind, message }
    }
}

impl From<std::io::Error> for UpdateFailure {
    fn from(e: std::io::Error) -> Self {
        let kind = if e.kind() == std::io::ErrorKind::TimedOut {
            FailureKind::Timeout
        } else {
            FailureKind::Generic
        };
        Self::new(kind, e.to_string())
    }
}
