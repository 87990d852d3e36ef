//! Error types for the kiosk bridge

use thiserror::Error;

/// Result type alias for host-side operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised on the privileged host side
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Unknown or malformed channel name
    #[error("channel error: {0}")]
    Channel(String),

    /// Rendering surface or OS print pipeline failure
    #[error("print error: {0}")]
    Print(String),

    /// Headless browser failure
    #[error("browser error: {0}")]
    Browser(String),

    /// Window or process control failure
    #[error("shell error: {0}")]
    Shell(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors surfaced to the UI by the message bridge
///
/// Authorization and rate-limit failures are produced before the host
/// transport is touched.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Channel is absent from the allowlist for the attempted direction
    #[error("unauthorized channel: {0}")]
    UnauthorizedChannel(String),

    /// Per-channel call budget exhausted for the current window
    #[error("rate limit exceeded for: {0}")]
    RateLimited(String),

    /// Argument rejected before any cross-process call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Host handler reported an error
    #[error("host error: {0}")]
    Host(String),

    /// Host transport is unavailable
    #[error("transport error: {0}")]
    Transport(String),

    /// Response payload did not match the expected shape
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether the caller may retry the same call later
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transport(_))
    }
}
