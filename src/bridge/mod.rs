//! Message bridge: the only capability surface exposed to the UI
//!
//! Every call is checked against the channel allowlist and the per-channel
//! rate limiter before it reaches the host transport. Host events are relayed
//! to listeners registered through [`Bridge::on`].

pub mod transport;

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use transport::HostTransport;

use crate::channels::{
    AllowedChannels, ChannelRateLimiter, ChannelRegistry, Direction, EventChannel, RequestChannel,
};
use crate::config::BridgeConfig;
use crate::events::{HostEvent, UpdateProgress};
use crate::print::{validate_html, PrintResponse};
use crate::update::{CommandResponse, UpdateCheckResponse};
use crate::BridgeError;

type Listener = Arc<dyn Fn(&HostEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    by_channel: HashMap<String, Vec<(u64, Listener)>>,
}

impl ListenerTable {
    fn insert(&mut self, channel: &str, listener: Listener) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.by_channel
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn remove(&mut self, channel: &str, id: u64) {
        if let Some(list) = self.by_channel.get_mut(channel) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                self.by_channel.remove(channel);
            }
        }
    }

    fn snapshot(&self, channel: &str) -> Vec<Listener> {
        self.by_channel
            .get(channel)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

fn lock(table: &Mutex<ListenerTable>) -> std::sync::MutexGuard<'_, ListenerTable> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

/// Listener registration; dropping it removes the listener
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    id: u64,
    channel: String,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    /// Channel this listener is attached to
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the listener now
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).remove(&self.channel, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Allowlists and rate-limit state, for diagnostics screens
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityInfo {
    pub allowed_channels: AllowedChannels,
    pub rate_limits: RateLimitInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub max_calls: u32,
    pub window_ms: u64,
    /// Calls counted in the current window, per channel
    pub channels: BTreeMap<String, u32>,
}

/// UI-side message bridge
pub struct Bridge {
    transport: Arc<dyn HostTransport>,
    registry: ChannelRegistry,
    limiter: ChannelRateLimiter,
    config: BridgeConfig,
    listeners: Arc<Mutex<ListenerTable>>,
    cancel: CancellationToken,
}

impl Bridge {
    /// Create a bridge and start relaying host events
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        transport: Arc<dyn HostTransport>,
        registry: ChannelRegistry,
        config: BridgeConfig,
    ) -> Self {
        let bridge = Self {
            limiter: ChannelRateLimiter::new(config.rate_limit, config.rate_window),
            listeners: Arc::new(Mutex::new(ListenerTable::default())),
            cancel: CancellationToken::new(),
            transport,
            registry,
            config,
        };
        bridge.spawn_relay();
        bridge
    }

    fn spawn_relay(&self) {
        let mut rx = self.transport.subscribe();
        let registry = self.registry.clone();
        let table = Arc::downgrade(&self.listeners);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "bridge event relay lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                let channel = event.channel();
                if !registry.is_allowed(channel.as_str(), Direction::HostEvent) {
                    tracing::warn!(%channel, "dropping event on unregistered channel");
                    continue;
                }
                let Some(table) = table.upgrade() else { break };
                let listeners = lock(&table).snapshot(channel.as_str());
                for listener in listeners {
                    // a panicking listener must not end delivery for the rest
                    if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                        tracing::error!(%channel, "bridge listener panicked");
                    }
                }
            }
            tracing::debug!("bridge event relay stopped");
        });
    }

    fn authorize(&self, channel: &str, direction: Direction) -> Result<(), BridgeError> {
        if !self.registry.is_allowed(channel, direction) {
            tracing::warn!(channel, ?direction, "blocked call on unauthorized channel");
            return Err(BridgeError::UnauthorizedChannel(channel.to_string()));
        }
        if !self.limiter.try_acquire(channel) {
            return Err(BridgeError::RateLimited(channel.to_string()));
        }
        Ok(())
    }

    /// Request/response call to the host
    ///
    /// Calls slower than the configured threshold are logged; they are never
    /// aborted.
    ///
    /// # Errors
    ///
    /// `UnauthorizedChannel` or `RateLimited` before the host is reached;
    /// otherwise whatever the host or transport reports
    pub async fn invoke(&self, channel: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.authorize(channel, Direction::Request)?;

        let started = Instant::now();
        let result = self.transport.invoke(channel, args).await;
        let elapsed = started.elapsed();

        if elapsed > self.config.slow_call_threshold {
            tracing::warn!(
                channel,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "slow bridge call"
            );
        }
        if let Err(ref e) = result {
            tracing::debug!(channel, error = %e, "bridge call failed");
        }
        result
    }

    async fn invoke_as<T: DeserializeOwned>(
        &self,
        channel: RequestChannel,
        args: Vec<Value>,
    ) -> Result<T, BridgeError> {
        let value = self.invoke(channel.as_str(), args).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn invoke_unit(&self, channel: RequestChannel) -> Result<(), BridgeError> {
        self.invoke(channel.as_str(), Vec::new()).await.map(drop)
    }

    /// Fire-and-forget notification to the host
    ///
    /// # Errors
    ///
    /// `UnauthorizedChannel` or `RateLimited` before the host is reached,
    /// `Transport` if the host is gone
    pub fn send(&self, channel: &str, args: Vec<Value>) -> Result<(), BridgeError> {
        self.authorize(channel, Direction::ClientSignal)?;
        self.transport.send(channel, args)
    }

    /// Register a listener for a host event channel
    ///
    /// Returns `None`, and registers nothing, if the channel is not an
    /// allowed event channel.
    pub fn on<F>(&self, channel: &str, listener: F) -> Option<Subscription>
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        if !self.registry.is_allowed(channel, Direction::HostEvent) {
            tracing::warn!(channel, "refused listener on unauthorized channel");
            return None;
        }
        let id = lock(&self.listeners).insert(channel, Arc::new(listener));
        Some(Subscription {
            id,
            channel: channel.to_string(),
            table: Arc::downgrade(&self.listeners),
        })
    }

    /// Print a receipt
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `html` is empty or larger than 1 MiB, checked
    /// before any host call; otherwise as [`Bridge::invoke`]
    pub async fn print_receipt(&self, html: &str) -> Result<PrintResponse, BridgeError> {
        validate_html(html).map_err(BridgeError::InvalidArgument)?;
        self.invoke_as(RequestChannel::PrintReceipt, vec![Value::String(html.to_string())])
            .await
    }

    /// Open developer tools; a no-op unless dev tools are enabled
    ///
    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn open_dev_tools(&self) -> Result<(), BridgeError> {
        if !self.config.dev_tools {
            tracing::debug!("dev tools disabled, ignoring request");
            return Ok(());
        }
        self.invoke_unit(RequestChannel::OpenDevTools).await
    }

    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn minimize(&self) -> Result<(), BridgeError> {
        self.invoke_unit(RequestChannel::WindowMinimize).await
    }

    /// Toggle between maximized and restored
    ///
    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn maximize(&self) -> Result<(), BridgeError> {
        self.invoke_unit(RequestChannel::WindowMaximize).await
    }

    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn close(&self) -> Result<(), BridgeError> {
        self.invoke_unit(RequestChannel::WindowClose).await
    }

    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn check_for_updates(&self) -> Result<UpdateCheckResponse, BridgeError> {
        self.invoke_as(RequestChannel::CheckForUpdates, Vec::new()).await
    }

    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn quit_and_install(&self) -> Result<CommandResponse, BridgeError> {
        self.invoke_as(RequestChannel::QuitAndInstall, Vec::new()).await
    }

    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn get_app_version(&self) -> Result<String, BridgeError> {
        self.invoke_as(RequestChannel::GetAppVersion, Vec::new()).await
    }

    /// # Errors
    ///
    /// As [`Bridge::invoke`]
    pub async fn restart_app(&self) -> Result<(), BridgeError> {
        self.invoke_unit(RequestChannel::RestartApp).await
    }

    /// Listen for update status lines
    pub fn on_updater_message<F>(&self, callback: F) -> Option<Subscription>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventChannel::UpdaterMessage.as_str(), move |event| {
            if let HostEvent::UpdaterMessage(message) = event {
                callback(message);
            }
        })
    }

    /// Listen for update failures
    pub fn on_updater_error<F>(&self, callback: F) -> Option<Subscription>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventChannel::UpdaterError.as_str(), move |event| {
            if let HostEvent::UpdaterError(message) = event {
                callback(message);
            }
        })
    }

    /// Listen for download progress
    pub fn on_updater_progress<F>(&self, callback: F) -> Option<Subscription>
    where
        F: Fn(&UpdateProgress) + Send + Sync + 'static,
    {
        self.on(EventChannel::UpdaterProgress.as_str(), move |event| {
            if let HostEvent::UpdaterProgress(progress) = event {
                callback(progress);
            }
        })
    }

    /// Listen for host lifecycle notices
    pub fn on_main_process_message<F>(&self, callback: F) -> Option<Subscription>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventChannel::MainProcessMessage.as_str(), move |event| {
            if let HostEvent::MainProcessMessage(message) = event {
                callback(message);
            }
        })
    }

    /// Allowlists and current rate-limit counters
    #[must_use]
    pub fn security_info(&self) -> SecurityInfo {
        let channels = self
            .limiter
            .snapshot()
            .into_iter()
            .map(|(channel, entry)| (channel, entry.count))
            .collect();
        SecurityInfo {
            allowed_channels: self.registry.allowlists(),
            rate_limits: RateLimitInfo {
                max_calls: self.limiter.limit(),
                window_ms: u64::try_from(self.limiter.window().as_millis()).unwrap_or(u64::MAX),
                channels,
            },
        }
    }

    /// Number of listeners currently registered on `channel`
    #[must_use]
    pub fn listener_count(&self, channel: &str) -> usize {
        lock(&self.listeners)
            .by_channel
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Stop relaying host events
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
