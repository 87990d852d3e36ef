//! Application assembly
//!
//! Builds the production object graph: Chromium-backed printing, the HTTP
//! update feed, a headless shell, the host dispatcher and the bridge in
//! front of it.

use std::sync::Arc;

use crate::bridge::{Bridge, HostTransport};
use crate::channels::ChannelRegistry;
use crate::config::Config;
use crate::events::EventBus;
use crate::host::{HeadlessShell, Host, HostHandle};
use crate::print::{ChromiumSurfaceFactory, LpSpooler, PrintOrchestrator, SurfaceFactory};
use crate::session::{FileTokenSource, TokenWatcher};
use crate::update::{HttpFeed, NoFeed, UpdateOrchestrator, UpdateTransport};
use crate::Result;

/// Running control plane
pub struct App {
    pub bridge: Bridge,
    pub host: HostHandle,
    pub printer: Arc<PrintOrchestrator>,
    pub updater: UpdateOrchestrator,
    pub shell: Arc<HeadlessShell>,
    /// Present when a token file is configured
    pub watcher: Option<TokenWatcher>,
    chromium: Arc<ChromiumSurfaceFactory>,
}

impl App {
    /// Assemble and start every component
    ///
    /// The browser is launched lazily on the first print job. Automatic
    /// update checks start immediately when updates are enabled.
    ///
    /// # Errors
    ///
    /// Returns error if the update feed URL is invalid
    pub fn launch(config: &Config) -> Result<Self> {
        let events = EventBus::new();

        let spooler = Arc::new(LpSpooler::new(config.print.spooler.clone()));
        let chromium = Arc::new(ChromiumSurfaceFactory::new(
            config.print.chrome_path.clone(),
            spooler,
        ));
        let printer = Arc::new(PrintOrchestrator::new(
            Arc::clone(&chromium) as Arc<dyn SurfaceFactory>,
            config.print.clone(),
        ));

        let mut update_config = config.update.clone();
        let transport: Arc<dyn UpdateTransport> = match update_config.feed_url {
            Some(_) => Arc::new(HttpFeed::new(&update_config)?),
            None => {
                if update_config.enabled {
                    tracing::warn!("no update feed URL configured, disabling updates");
                    update_config.enabled = false;
                }
                Arc::new(NoFeed)
            }
        };
        let updater = UpdateOrchestrator::new(
            transport,
            events.clone(),
            env!("CARGO_PKG_VERSION"),
            update_config,
        );

        let shell = Arc::new(HeadlessShell::process());
        let host = Host::new(
            config.dev_mode,
            Arc::clone(&shell) as Arc<dyn crate::host::Shell>,
            Arc::clone(&printer),
            updater.clone(),
            events,
        )
        .spawn();

        let bridge = Bridge::new(
            Arc::new(host.clone()) as Arc<dyn HostTransport>,
            ChannelRegistry::default(),
            config.bridge.clone(),
        );

        let watcher = config.session.token_file.as_ref().map(|path| {
            TokenWatcher::new(
                Arc::new(FileTokenSource::new(path.clone())),
                config.session.clone(),
            )
        });

        updater.start();
        host.ready();
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            dev_mode = config.dev_mode,
            updates = updater.is_enabled(),
            "kiosk bridge started"
        );

        Ok(Self {
            bridge,
            host,
            printer,
            updater,
            shell,
            watcher,
            chromium,
        })
    }

    /// Stop timers and background tasks and release print surfaces
    pub async fn shutdown(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.stop_watching();
        }
        self.bridge.shutdown();
        self.updater.shutdown().await;
        self.printer.shutdown().await;
        self.chromium.close().await;
        tracing::info!("kiosk bridge stopped");
    }
}
