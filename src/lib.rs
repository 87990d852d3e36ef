//! Kiosk Bridge - control plane between a sandboxed UI and its privileged host
//!
//! This library provides:
//! - A named-channel message bridge with an allowlist and per-channel rate limiting
//! - A host dispatcher routing requests to window, print and update handlers
//! - Receipt printing through ephemeral headless rendering surfaces
//! - Software updates with retry/backoff, progress events and an install countdown
//! - A session expiry watcher for bearer tokens
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  UI (untrusted)                      │
//! └────────────────────┬────────────────────────────────┘
//!                      │ invoke / send / on
//! ┌────────────────────▼────────────────────────────────┐
//! │   Bridge: allowlist │ rate limiter │ event relay     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ HostTransport
//! ┌────────────────────▼────────────────────────────────┐
//! │   Host: Shell │ PrintOrchestrator │ UpdateOrchestrator│
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod print;
pub mod session;
pub mod timer;
pub mod update;

pub use app::App;
pub use bridge::{Bridge, HostTransport, SecurityInfo, Subscription};
pub use channels::{ChannelRateLimiter, ChannelRegistry, Direction, EventChannel, RequestChannel};
pub use config::Config;
pub use error::{BridgeError, Error, Result};
pub use events::{EventBus, HostEvent, UpdateProgress};
pub use host::{HeadlessShell, Host, HostHandle, Shell};
pub use print::{PrintOptions, PrintOrchestrator, PrintResponse};
pub use session::{SessionSignal, TokenWatcher};
pub use update::{UpdateOrchestrator, UpdatePhase, UpdateState};
