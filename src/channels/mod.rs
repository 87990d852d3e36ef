//! Channel allowlist for the host/UI boundary
//!
//! Every name that crosses the boundary must be registered up front for the
//! direction it travels in. Lookups fail closed: a name missing from the
//! relevant list is never forwarded, executed, or relayed.

pub mod rate_limiter;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use rate_limiter::{ChannelRateLimiter, RateLimitEntry};

use crate::Error;

/// Direction a channel travels in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// UI → host request with a response
    Request,
    /// Host → UI unsolicited event
    HostEvent,
    /// UI → host fire-and-forget notification
    ClientSignal,
}

/// A registered channel name and its direction
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ChannelDescriptor {
    /// Channel name as used on the wire
    pub name: String,
    /// Direction the channel is registered for
    pub direction: Direction,
}

/// Request channels with a host handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestChannel {
    PrintReceipt,
    OpenDevTools,
    WindowMinimize,
    WindowMaximize,
    WindowClose,
    CheckForUpdates,
    QuitAndInstall,
    GetAppVersion,
    RestartApp,
}

impl RequestChannel {
    /// Every request channel, in registry order
    pub const ALL: [Self; 9] = [
        Self::PrintReceipt,
        Self::OpenDevTools,
        Self::WindowMinimize,
        Self::WindowMaximize,
        Self::WindowClose,
        Self::CheckForUpdates,
        Self::QuitAndInstall,
        Self::GetAppVersion,
        Self::RestartApp,
    ];

    /// Wire name of the channel
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrintReceipt => "print-receipt",
            Self::OpenDevTools => "open-dev-tools",
            Self::WindowMinimize => "window-minimize",
            Self::WindowMaximize => "window-maximize",
            Self::WindowClose => "window-close",
            Self::CheckForUpdates => "check-for-updates",
            Self::QuitAndInstall => "quit-and-install",
            Self::GetAppVersion => "get-app-version",
            Self::RestartApp => "restart-app",
        }
    }
}

impl fmt::Display for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestChannel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Channel(format!("unknown request channel: {s}")))
    }
}

/// Host-originated event channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventChannel {
    MainProcessMessage,
    UpdaterMessage,
    UpdaterError,
    UpdaterProgress,
}

impl EventChannel {
    /// Every event channel, in registry order
    pub const ALL: [Self; 4] = [
        Self::MainProcessMessage,
        Self::UpdaterMessage,
        Self::UpdaterError,
        Self::UpdaterProgress,
    ];

    /// Wire name of the channel
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MainProcessMessage => "main-process-message",
            Self::UpdaterMessage => "updater-message",
            Self::UpdaterError => "updater-error",
            Self::UpdaterProgress => "updater-progress",
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventChannel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Channel(format!("unknown event channel: {s}")))
    }
}

/// Allowlists grouped by direction, in the shape the UI inspects
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedChannels {
    pub invoke: Vec<String>,
    pub on: Vec<String>,
    pub send: Vec<String>,
}

/// Static allowlist of channel names, partitioned by direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRegistry {
    requests: BTreeSet<String>,
    host_events: BTreeSet<String>,
    client_signals: BTreeSet<String>,
}

impl Default for ChannelRegistry {
    /// The fixed production vocabulary; client signals are reserved and empty
    fn default() -> Self {
        Self::new(
            RequestChannel::ALL.map(RequestChannel::as_str),
            EventChannel::ALL.map(EventChannel::as_str),
            std::iter::empty::<&str>(),
        )
    }
}

impl ChannelRegistry {
    /// Build a registry from explicit name lists
    #[must_use]
    pub fn new<R, E, S>(requests: R, host_events: E, client_signals: S) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            requests: requests.into_iter().map(Into::into).collect(),
            host_events: host_events.into_iter().map(Into::into).collect(),
            client_signals: client_signals.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether `name` is registered for `direction`
    #[must_use]
    pub fn is_allowed(&self, name: &str, direction: Direction) -> bool {
        self.names(direction).contains(name)
    }

    /// All registered descriptors, ordered by direction then name
    #[must_use]
    pub fn descriptors(&self) -> Vec<ChannelDescriptor> {
        [Direction::Request, Direction::HostEvent, Direction::ClientSignal]
            .into_iter()
            .flat_map(|direction| {
                self.names(direction).iter().map(move |name| ChannelDescriptor {
                    name: name.clone(),
                    direction,
                })
            })
            .collect()
    }

    /// Allowlists grouped by the call pattern that uses them
    #[must_use]
    pub fn allowlists(&self) -> AllowedChannels {
        AllowedChannels {
            invoke: self.requests.iter().cloned().collect(),
            on: self.host_events.iter().cloned().collect(),
            send: self.client_signals.iter().cloned().collect(),
        }
    }

    const fn names(&self, direction: Direction) -> &BTreeSet<String> {
        match direction {
            Direction::Request => &self.requests,
            Direction::HostEvent => &self.host_events,
            Direction::ClientSignal => &self.client_signals,
        }
    }
}
