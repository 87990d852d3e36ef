//! Session expiry watcher
//!
//! Polls the current bearer token, decodes its expiry and broadcasts a
//! warning while the session is about to lapse and a single expiry signal
//! once it has. A missing token means the user logged out and stops the
//! watch; an unreadable token is logged and skipped.

pub mod token;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use token::{rounded_minutes, TokenError, TokenInfo};

use crate::config::SessionConfig;
use crate::timer::sleep_or_cancel;

const SIGNAL_CAPACITY: usize = 16;

const WARNING_MESSAGE: &str = "Your session will expire soon";
const EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// Provides the current bearer token, if the user is logged in
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// In-memory token, set by whoever owns the login flow
#[derive(Debug, Default)]
pub struct StaticTokenSource {
    token: RwLock<Option<String>>,
}

impl StaticTokenSource {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the token (login or refresh)
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    /// Forget the token (logout)
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Token persisted to a file by the auth layer
///
/// A missing or empty file means logged out. An optional `Bearer ` prefix
/// is stripped.
#[derive(Debug, Clone)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for FileTokenSource {
    async fn token(&self) -> Option<String> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to read token file");
                }
                return None;
            }
        };
        let token = content.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

/// Notification broadcast to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionSignal {
    /// Session lapses within the warning threshold
    Warning {
        #[serde(rename = "expiresInMinutes")]
        minutes_remaining: i64,
        message: String,
    },
    /// Session has lapsed; polling has stopped
    Expired { message: String },
}

/// Watcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Idle,
    Watching,
    Warning,
    Expired,
}

/// Summary of the current token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_minutes: Option<i64>,
}

impl TokenStatus {
    const fn invalid() -> Self {
        Self {
            is_valid: false,
            expires_at: None,
            expires_in_minutes: None,
        }
    }
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Session expiry watcher
///
/// Cheap to clone; clones share the poll task and subscribers.
#[derive(Clone)]
pub struct TokenWatcher {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn TokenSource>,
    config: SessionConfig,
    tx: broadcast::Sender<SessionSignal>,
    state: Mutex<WatchState>,
    poll: Mutex<Option<CancellationToken>>,
    clock: Clock,
}

impl TokenWatcher {
    /// Create a watcher reading tokens from `source`
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>, config: SessionConfig) -> Self {
        Self::with_clock(source, config, Arc::new(|| Utc::now().timestamp()))
    }

    /// Create a watcher with an explicit clock (Unix seconds)
    #[must_use]
    pub fn with_clock(source: Arc<dyn TokenSource>, config: SessionConfig, clock: Clock) -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                tx,
                state: Mutex::new(WatchState::Idle),
                poll: Mutex::new(None),
                clock,
            }),
        }
    }

    /// Receive every signal broadcast after this call
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.inner.tx.subscribe()
    }

    /// Current watcher state
    #[must_use]
    pub fn state(&self) -> WatchState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a poll task is active
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.inner
            .poll
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Start polling: replaces any running poll, checks immediately, then
    /// checks every `poll_interval`
    pub async fn start_watching(&self) {
        self.stop_watching();
        tracing::info!(
            interval_secs = self.inner.config.poll_interval.as_secs(),
            "starting session expiry watch"
        );

        let cancel = CancellationToken::new();
        *self.inner.poll.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        self.set_state(WatchState::Watching);

        self.check_now().await;
        if cancel.is_cancelled() {
            return;
        }

        let this = self.clone();
        let interval = self.inner.config.poll_interval;
        tokio::spawn(async move {
            while sleep_or_cancel(&cancel, interval).await {
                this.check_now().await;
            }
        });
    }

    /// Stop polling (idempotent)
    pub fn stop_watching(&self) {
        let poll = self
            .inner
            .poll
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(cancel) = poll {
            cancel.cancel();
            self.set_state(WatchState::Idle);
            tracing::info!("stopped session expiry watch");
        }
    }

    /// Run one expiry check and broadcast the resulting signal, if any
    pub async fn check_now(&self) -> Option<SessionSignal> {
        let Some(token) = self.inner.source.token().await else {
            tracing::debug!("no session token, stopping watch");
            self.stop_watching();
            return None;
        };

        let info = match TokenInfo::decode(&token) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "session token has no readable expiry, skipping check");
                return None;
            }
        };

        let remaining = info.remaining_secs((self.inner.clock)());
        tracing::debug!(minutes = rounded_minutes(remaining), "session expiry check");

        let signal = if remaining <= 0 {
            tracing::warn!("session token expired");
            self.stop_watching();
            self.set_state(WatchState::Expired);
            SessionSignal::Expired {
                message: EXPIRED_MESSAGE.to_string(),
            }
        } else if remaining <= threshold_secs(&self.inner.config) {
            tracing::warn!(remaining_secs = remaining, "session token expires soon");
            if self.is_watching() {
                self.set_state(WatchState::Warning);
            }
            SessionSignal::Warning {
                minutes_remaining: rounded_minutes(remaining),
                message: WARNING_MESSAGE.to_string(),
            }
        } else {
            if self.is_watching() {
                self.set_state(WatchState::Watching);
            }
            return None;
        };

        let _ = self.inner.tx.send(signal.clone());
        Some(signal)
    }

    /// Validity and expiry of the current token
    pub async fn token_info(&self) -> TokenStatus {
        let Some(token) = self.inner.source.token().await else {
            return TokenStatus::invalid();
        };
        let Ok(info) = TokenInfo::decode(&token) else {
            return TokenStatus::invalid();
        };

        let remaining = info.remaining_secs((self.inner.clock)());
        TokenStatus {
            is_valid: remaining > 0,
            expires_at: info.expires_at_utc(),
            expires_in_minutes: Some(rounded_minutes(remaining)),
        }
    }

    fn set_state(&self, state: WatchState) {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

fn threshold_secs(config: &SessionConfig) -> i64 {
    i64::try_from(config.warning_threshold.as_secs()).unwrap_or(i64::MAX)
}
