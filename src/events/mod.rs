//! Host → UI event variants and the broadcast bus that carries them
//!
//! Each event channel has its own variant, so listeners match on the payload
//! shape instead of probing untyped values. Publishing is best-effort: an
//! event with no subscribers is dropped silently.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::channels::EventChannel;

/// Channel capacity for host events
const CHANNEL_CAPACITY: usize = 64;

const BYTES_PER_KB: u64 = 1024;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Event pushed from the host to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum HostEvent {
    /// Host lifecycle notice (sent once the UI has loaded)
    MainProcessMessage(String),
    /// Update status line
    UpdaterMessage(String),
    /// Update failure, already classified for display
    UpdaterError(String),
    /// Download progress
    UpdaterProgress(UpdateProgress),
}

impl HostEvent {
    /// Event channel this variant is delivered on
    #[must_use]
    pub const fn channel(&self) -> EventChannel {
        match self {
            Self::MainProcessMessage(_) => EventChannel::MainProcessMessage,
            Self::UpdaterMessage(_) => EventChannel::UpdaterMessage,
            Self::UpdaterError(_) => EventChannel::UpdaterError,
            Self::UpdaterProgress(_) => EventChannel::UpdaterProgress,
        }
    }
}

/// Download progress in display units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgress {
    /// Completion, 0-100
    pub percent: u8,
    /// Transferred so far, in MB
    pub transferred: u64,
    /// Artifact size, in MB
    pub total: u64,
    /// Instantaneous speed, in KB/s
    pub speed: u64,
    /// Status line for the UI
    pub message: String,
}

impl UpdateProgress {
    /// Convert raw byte counters into rounded display units
    #[must_use]
    pub fn from_bytes(transferred: u64, total: u64, bytes_per_second: u64) -> Self {
        let percent = percent_of(transferred, total);
        Self {
            percent,
            transferred: rounded_div(transferred, BYTES_PER_MB),
            total: rounded_div(total, BYTES_PER_MB),
            speed: rounded_div(bytes_per_second, BYTES_PER_KB),
            message: format!("Downloading update: {percent}%"),
        }
    }
}

/// Percentage of `part` in `whole`, rounded and clamped to 0-100
#[must_use]
pub fn percent_of(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 0;
    }
    let pct = rounded_div(part.saturating_mul(100), whole).min(100);
    u8::try_from(pct).unwrap_or(100)
}

const fn rounded_div(value: u64, divisor: u64) -> u64 {
    value.saturating_add(divisor / 2) / divisor
}

/// Broadcast bus for host events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HostEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to every event published after this call
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }

    /// Publish an event (ignored if nobody is listening)
    pub fn publish(&self, event: HostEvent) {
        tracing::trace!(channel = %event.channel(), "publishing host event");
        let _ = self.tx.send(event);
    }

    /// Publish an `updater-message` status line
    pub fn updater_message(&self, message: impl Into<String>) {
        self.publish(HostEvent::UpdaterMessage(message.into()));
    }

    /// Publish an `updater-error` line
    pub fn updater_error(&self, message: impl Into<String>) {
        self.publish(HostEvent::UpdaterError(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_their_channel() {
        assert_eq!(
            HostEvent::UpdaterError("x".into()).channel(),
            EventChannel::UpdaterError
        );
        assert_eq!(
            HostEvent::MainProcessMessage("x".into()).channel(),
            EventChannel::MainProcessMessage
        );
    }

    #[test]
    fn progress_rounds_like_the_ui_expects() {
        // 5.5 MB of 11 MB at 1536 B/s
        let p = UpdateProgress::from_bytes(5_767_168, 11_534_336, 1536);
        assert_eq!(p.percent, 50);
        assert_eq!(p.transferred, 6);
        assert_eq!(p.total, 11);
        assert_eq!(p.speed, 2);
        assert_eq!(p.message, "Downloading update: 50%");
    }

    #[test]
    fn percent_handles_unknown_total() {
        assert_eq!(percent_of(1234, 0), 0);
        assert_eq!(percent_of(10, 10), 100);
        assert_eq!(percent_of(20, 10), 100);
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 67);
    }

    #[test]
    fn progress_event_serializes_with_channel_tag() {
        let event = HostEvent::UpdaterProgress(UpdateProgress::from_bytes(0, 0, 0));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "updater-progress");
        assert_eq!(json["payload"]["percent"], 0);
        assert!(json["payload"].get("speed").is_some());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.updater_message("nobody home");

        let mut rx = bus.subscribe();
        bus.updater_error("boom");
        assert_eq!(rx.recv().await.unwrap(), HostEvent::UpdaterError("boom".into()));
    }
}
