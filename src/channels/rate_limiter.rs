//! Per-channel fixed-window rate limiter for bridge calls

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Default number of calls allowed per window
pub const DEFAULT_LIMIT: u32 = 10;

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1000);

/// Call counter for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Calls accepted in the current window
    pub count: u32,
    /// Instant after which the next call opens a fresh window
    pub window_reset_at: Instant,
}

/// Per-channel rate limiter for bridge calls
///
/// Each channel owns an independent counter, so a busy channel never
/// starves another.
#[derive(Debug, Clone)]
pub struct ChannelRateLimiter {
    /// Maximum calls per window
    limit: u32,
    /// Window length
    window: Duration,
    /// Counter per channel, created lazily
    entries: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
}

impl Default for ChannelRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}

impl ChannelRateLimiter {
    /// Create a limiter allowing `limit` calls per `window` on each channel
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Try to take one call from the channel's budget. Returns true if allowed.
    ///
    /// Rejections do not increment the counter, so repeated rejections within
    /// one window leave the entry unchanged.
    pub fn try_acquire(&self, channel: &str) -> bool {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if let Some(entry) = map.get_mut(channel) {
            if now <= entry.window_reset_at {
                if entry.count >= self.limit {
                    tracing::warn!(channel, limit = self.limit, "rate limit exceeded for channel");
                    return false;
                }
                entry.count += 1;
                return true;
            }
        }

        map.insert(
            channel.to_string(),
            RateLimitEntry {
                count: 1,
                window_reset_at: now + self.window,
            },
        );
        true
    }

    /// Current counter for a channel, if it has been called
    #[must_use]
    pub fn entry(&self, channel: &str) -> Option<RateLimitEntry> {
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.get(channel).copied()
    }

    /// Copy of every channel counter
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, RateLimitEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Calls allowed per window
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}
