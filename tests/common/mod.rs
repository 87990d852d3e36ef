//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header, encode};
use kiosk_bridge::config::{BridgeConfig, PrintConfig, UpdateConfig};
use kiosk_bridge::print::{PrintOptions, RenderSurface, SurfaceFactory, SurfaceSpec};
use kiosk_bridge::update::{DownloadProgress, UpdateArtifact, UpdateFailure, UpdateTransport};
use kiosk_bridge::{
    Bridge, BridgeError, ChannelRegistry, Error, EventBus, HeadlessShell, Host, HostEvent,
    HostHandle, HostTransport, PrintOrchestrator, Shell, UpdateOrchestrator,
};
use serde_json::Value;
use tokio::sync::broadcast;

/// Fixed "now" for session tests, Unix seconds
pub const NOW: i64 = 1_800_000_000;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

// -- bridge ---------------------------------------------------------------

/// Host transport that records calls and answers with a fixed value
pub struct RecordingTransport {
    pub calls: Mutex<Vec<(String, Vec<Value>)>>,
    pub signals: Mutex<Vec<String>>,
    pub reply: Mutex<Result<Value, String>>,
    pub delay: Duration,
    pub events: EventBus,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            reply: Mutex::new(Ok(Value::Null)),
            delay,
            events: EventBus::new(),
        }
    }

    pub fn reply_with(&self, reply: Result<Value, String>) {
        *lock(&self.reply) = reply;
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl HostTransport for RecordingTransport {
    async fn invoke(&self, channel: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        lock(&self.calls).push((channel.to_string(), args));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        lock(&self.reply).clone().map_err(BridgeError::Host)
    }

    fn send(&self, channel: &str, _args: Vec<Value>) -> Result<(), BridgeError> {
        lock(&self.signals).push(channel.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

pub fn bridge_over(transport: &Arc<RecordingTransport>) -> Bridge {
    Bridge::new(
        Arc::clone(transport) as Arc<dyn HostTransport>,
        ChannelRegistry::default(),
        BridgeConfig::default(),
    )
}

/// Let spawned relay tasks run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// -- print ----------------------------------------------------------------

/// How one scripted surface behaves
#[derive(Debug, Clone)]
pub struct SurfaceScript {
    pub load_error: Option<String>,
    pub print_result: Result<bool, String>,
    pub load_time: Duration,
    pub print_time: Duration,
}

impl Default for SurfaceScript {
    fn default() -> Self {
        Self {
            load_error: None,
            print_result: Ok(true),
            load_time: Duration::ZERO,
            print_time: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub struct SurfaceCounters {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub live: AtomicUsize,
    pub peak_live: AtomicUsize,
    pub printed_html: Mutex<Vec<String>>,
}

/// Surface factory handing out scripted surfaces in order
#[derive(Default)]
pub struct ScriptedSurfaces {
    scripts: Mutex<VecDeque<SurfaceScript>>,
    pub counters: Arc<SurfaceCounters>,
}

impl ScriptedSurfaces {
    pub fn new(scripts: Vec<SurfaceScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            counters: Arc::new(SurfaceCounters::default()),
        })
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.counters.destroyed.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.counters.peak_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SurfaceFactory for ScriptedSurfaces {
    async fn create(&self, _spec: SurfaceSpec) -> kiosk_bridge::Result<Box<dyn RenderSurface>> {
        let script = lock(&self.scripts).pop_front().unwrap_or_default();
        let counters = Arc::clone(&self.counters);
        counters.created.fetch_add(1, Ordering::SeqCst);
        let live = counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(ScriptedSurface {
            script,
            counters,
            html: None,
        }))
    }
}

struct ScriptedSurface {
    script: SurfaceScript,
    counters: Arc<SurfaceCounters>,
    html: Option<String>,
}

#[async_trait]
impl RenderSurface for ScriptedSurface {
    async fn load_html(&mut self, html: &str) -> kiosk_bridge::Result<()> {
        tokio::time::sleep(self.script.load_time).await;
        if let Some(e) = &self.script.load_error {
            return Err(Error::Print(e.clone()));
        }
        self.html = Some(html.to_string());
        Ok(())
    }

    async fn print(&mut self, _options: &PrintOptions) -> kiosk_bridge::Result<bool> {
        tokio::time::sleep(self.script.print_time).await;
        let printed = self.script.print_result.clone().map_err(Error::Print)?;
        if printed {
            if let Some(html) = self.html.take() {
                lock(&self.counters.printed_html).push(html);
            }
        }
        Ok(printed)
    }

    async fn destroy(&mut self) {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn print_config(max_concurrent_jobs: usize) -> PrintConfig {
    PrintConfig {
        max_concurrent_jobs,
        ..PrintConfig::default()
    }
}

// -- update ---------------------------------------------------------------

/// Update transport replaying scripted check results
pub struct ScriptedFeed {
    checks: Mutex<VecDeque<Result<Option<UpdateArtifact>, UpdateFailure>>>,
    downloads: Mutex<VecDeque<Result<(), UpdateFailure>>>,
    pub check_delay: Duration,
    pub check_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub installs: Mutex<Vec<PathBuf>>,
    downloads_dir: tempfile::TempDir,
}

impl ScriptedFeed {
    pub fn new(checks: Vec<Result<Option<UpdateArtifact>, UpdateFailure>>) -> Self {
        Self {
            checks: Mutex::new(checks.into()),
            downloads: Mutex::new(VecDeque::new()),
            check_delay: Duration::ZERO,
            check_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            installs: Mutex::new(Vec::new()),
            downloads_dir: tempfile::tempdir().unwrap(),
        }
    }

    #[must_use]
    pub fn with_downloads(self, downloads: Vec<Result<(), UpdateFailure>>) -> Self {
        *lock(&self.downloads) = downloads.into();
        self
    }

    #[must_use]
    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    pub fn checks(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn install_count(&self) -> usize {
        lock(&self.installs).len()
    }
}

#[async_trait]
impl UpdateTransport for ScriptedFeed {
    async fn check(&self) -> Result<Option<UpdateArtifact>, UpdateFailure> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }
        lock(&self.checks).pop_front().unwrap_or(Ok(None))
    }

    async fn download(
        &self,
        artifact: &UpdateArtifact,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<PathBuf, UpdateFailure> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.downloads).pop_front().unwrap_or(Ok(()))?;

        let total = 4 * 1024 * 1024;
        for step in 1..=4u64 {
            progress(DownloadProgress {
                transferred: step * 1024 * 1024,
                total,
                bytes_per_second: 512 * 1024,
            });
        }
        // artifacts carrying a digest get a real file so it can be verified
        if artifact.sha512.is_some() {
            let path = self.downloads_dir.path().join(format!("kiosk-bridge-{}", artifact.version));
            std::fs::write(&path, installer_payload(&artifact.version))?;
            return Ok(path);
        }
        Ok(PathBuf::from(format!("/tmp/kiosk-bridge-{}", artifact.version)))
    }

    async fn quit_and_install(&self, installer: &Path) -> Result<(), UpdateFailure> {
        lock(&self.installs).push(installer.to_path_buf());
        Ok(())
    }
}

pub fn artifact(version: &str) -> UpdateArtifact {
    UpdateArtifact {
        version: version.to_string(),
        url: format!("kiosk-bridge-{version}.AppImage"),
        size: Some(4 * 1024 * 1024),
        release_date: None,
        sha512: None,
    }
}

/// Bytes a scripted download writes for `version`
pub fn installer_payload(version: &str) -> Vec<u8> {
    format!("kiosk-bridge installer {version}").into_bytes()
}

/// Artifact published with a base64 SHA-512 digest
pub fn signed_artifact(version: &str, sha512: &str) -> UpdateArtifact {
    UpdateArtifact {
        sha512: Some(sha512.to_string()),
        ..artifact(version)
    }
}

/// The digest a feed would publish for [`installer_payload`]
pub fn payload_sha512(version: &str) -> String {
    use base64::Engine as _;
    use sha2::{Digest, Sha512};

    base64::engine::general_purpose::STANDARD.encode(Sha512::digest(installer_payload(version)))
}

/// Poll `done` on real time until it holds
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

pub fn offline() -> UpdateFailure {
    UpdateFailure::classified("net::ERR_INTERNET_DISCONNECTED")
}

pub fn updater(feed: &Arc<ScriptedFeed>, events: &EventBus, config: UpdateConfig) -> UpdateOrchestrator {
    UpdateOrchestrator::new(
        Arc::clone(feed) as Arc<dyn UpdateTransport>,
        events.clone(),
        "1.0.0",
        config,
    )
}

/// Drain every event currently buffered on `rx`
pub fn drain(rx: &mut broadcast::Receiver<HostEvent>) -> Vec<HostEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn errors(events: &[HostEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            HostEvent::UpdaterError(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

pub fn messages(events: &[HostEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            HostEvent::UpdaterMessage(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

// -- full stack -----------------------------------------------------------

/// Bridge wired to a real host over scripted print and update backends
pub struct Stack {
    pub bridge: Bridge,
    pub host: HostHandle,
    pub shell: Arc<HeadlessShell>,
    pub printer: Arc<PrintOrchestrator>,
    pub updater: UpdateOrchestrator,
    pub surfaces: Arc<ScriptedSurfaces>,
    pub feed: Arc<ScriptedFeed>,
}

pub struct StackOptions {
    pub dev_mode: bool,
    pub bridge: BridgeConfig,
    pub update: UpdateConfig,
    pub surfaces: Vec<SurfaceScript>,
    pub feed: ScriptedFeed,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            dev_mode: false,
            bridge: BridgeConfig::default(),
            update: UpdateConfig::default(),
            surfaces: Vec::new(),
            feed: ScriptedFeed::new(Vec::new()),
        }
    }
}

pub fn stack(options: StackOptions) -> Stack {
    let events = EventBus::new();
    let surfaces = ScriptedSurfaces::new(options.surfaces);
    let printer = Arc::new(PrintOrchestrator::new(
        Arc::clone(&surfaces) as Arc<dyn SurfaceFactory>,
        PrintConfig::default(),
    ));
    let feed = Arc::new(options.feed);
    let updater = updater(&feed, &events, options.update);
    let shell = Arc::new(HeadlessShell::new());

    let host = Host::new(
        options.dev_mode,
        Arc::clone(&shell) as Arc<dyn Shell>,
        Arc::clone(&printer),
        updater.clone(),
        events,
    )
    .spawn();
    let bridge = Bridge::new(
        Arc::new(host.clone()) as Arc<dyn HostTransport>,
        ChannelRegistry::default(),
        options.bridge,
    );

    Stack {
        bridge,
        host,
        shell,
        printer,
        updater,
        surfaces,
        feed,
    }
}

// -- session --------------------------------------------------------------

/// Sign a token expiring `secs` after [`NOW`]
pub fn token_expiring_in(secs: i64) -> String {
    #[derive(serde::Serialize)]
    struct Claims {
        sub: &'static str,
        exp: i64,
    }
    encode(
        &Header::default(),
        &Claims {
            sub: "cashier-7",
            exp: NOW + secs,
        },
        &EncodingKey::from_secret(b"backend-only-secret"),
    )
    .unwrap()
}
