//! Privileged host: routes bridge requests to their handlers
//!
//! Requests are queued in arrival order and each one is started on its own
//! task, so a slow print never holds up a window control. Only names that
//! parse as a [`RequestChannel`] have a handler; anything else is refused
//! here as well, independently of the bridge allowlist.

pub mod shell;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

pub use shell::{HeadlessShell, Shell, WindowState};

use crate::bridge::HostTransport;
use crate::channels::RequestChannel;
use crate::events::{EventBus, HostEvent};
use crate::print::{PrintOrchestrator, PrintResponse};
use crate::update::UpdateOrchestrator;
use crate::{BridgeError, Error};

/// Requests buffered before callers wait
const QUEUE_CAPACITY: usize = 64;

/// A message crossing from the bridge into the host
#[derive(Debug)]
pub enum Envelope {
    /// Request expecting a reply
    Invoke {
        channel: String,
        args: Vec<Value>,
        reply: oneshot::Sender<Result<Value, BridgeError>>,
    },
    /// Client signal, no reply
    Signal { channel: String, args: Vec<Value> },
}

/// Host-side request router
pub struct Host {
    dev_mode: bool,
    shell: Arc<dyn Shell>,
    printer: Arc<PrintOrchestrator>,
    updater: UpdateOrchestrator,
    events: EventBus,
}

impl Host {
    /// Wire the host to its handlers
    #[must_use]
    pub fn new(
        dev_mode: bool,
        shell: Arc<dyn Shell>,
        printer: Arc<PrintOrchestrator>,
        updater: UpdateOrchestrator,
        events: EventBus,
    ) -> Self {
        Self {
            dev_mode,
            shell,
            printer,
            updater,
            events,
        }
    }

    /// Start the dispatch loop
    ///
    /// The loop ends once every [`HostHandle`] is dropped.
    #[must_use]
    pub fn spawn(self) -> HostHandle {
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
        let events = self.events.clone();
        let host = Arc::new(self);

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Invoke {
                        channel,
                        args,
                        reply,
                    } => {
                        let host = Arc::clone(&host);
                        tokio::spawn(async move {
                            let result = host.handle(&channel, args).await;
                            if reply.send(result).is_err() {
                                tracing::debug!(%channel, "caller went away before reply");
                            }
                        });
                    }
                    Envelope::Signal { channel, args } => {
                        tracing::debug!(%channel, args = args.len(), "ignoring client signal with no handler");
                    }
                }
            }
            tracing::debug!("host dispatch loop stopped");
        });

        HostHandle { tx, events }
    }

    /// Run the handler for one request
    ///
    /// # Errors
    ///
    /// `UnauthorizedChannel` for names with no handler, `Host` when a
    /// window or process control fails
    pub async fn handle(&self, channel: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let Ok(request) = channel.parse::<RequestChannel>() else {
            tracing::warn!(channel, "host refused request with no handler");
            return Err(BridgeError::UnauthorizedChannel(channel.to_string()));
        };
        tracing::debug!(%request, "handling request");

        match request {
            RequestChannel::PrintReceipt => {
                let response = match args.first().and_then(Value::as_str) {
                    Some(html) => self.printer.print(html).await,
                    None => PrintResponse::failed(None, "print-receipt expects one string argument"),
                };
                to_value(&response)
            }
            RequestChannel::OpenDevTools => {
                if self.dev_mode {
                    self.shell.open_dev_tools().await.map_err(host_error)?;
                } else {
                    tracing::warn!("dev tools requested outside development mode");
                }
                Ok(Value::Null)
            }
            RequestChannel::WindowMinimize => unit(self.shell.minimize().await),
            RequestChannel::WindowMaximize => {
                if self.shell.is_maximized().await {
                    unit(self.shell.unmaximize().await)
                } else {
                    unit(self.shell.maximize().await)
                }
            }
            RequestChannel::WindowClose => unit(self.shell.close().await),
            RequestChannel::CheckForUpdates => to_value(&self.updater.check_for_updates().await),
            RequestChannel::QuitAndInstall => to_value(&self.updater.quit_and_install().await),
            RequestChannel::GetAppVersion => Ok(Value::String(self.updater.current_version())),
            RequestChannel::RestartApp => unit(self.shell.relaunch().await),
        }
    }
}

fn host_error(e: Error) -> BridgeError {
    tracing::error!(error = %e, "host handler failed");
    BridgeError::Host(e.to_string())
}

fn unit(result: crate::Result<()>) -> Result<Value, BridgeError> {
    result.map(|()| Value::Null).map_err(host_error)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, BridgeError> {
    Ok(serde_json::to_value(value)?)
}

/// Connection to a running [`Host`]
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<Envelope>,
    events: EventBus,
}

impl HostHandle {
    /// Announce that the UI has loaded (`main-process-message`)
    pub fn ready(&self) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        tracing::info!(%stamp, "ui ready");
        self.events.publish(HostEvent::MainProcessMessage(stamp));
    }

    /// Host event bus
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether the dispatch loop is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[async_trait]
impl HostTransport for HostHandle {
    async fn invoke(&self, channel: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Invoke {
                channel: channel.to_string(),
                args,
                reply,
            })
            .await
            .map_err(|_| BridgeError::Transport("host is not running".to_string()))?;
        rx.await
            .map_err(|_| BridgeError::Transport("host dropped the request".to_string()))?
    }

    fn send(&self, channel: &str, args: Vec<Value>) -> Result<(), BridgeError> {
        self.tx
            .try_send(Envelope::Signal {
                channel: channel.to_string(),
                args,
            })
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}
