//! Software update orchestration
//!
//! Drives `Idle → Checking → {NotAvailable | Available} → Downloading →
//! Downloaded → Installing`, with `Failed` once retries are exhausted. Every
//! phase change is announced on `updater-message`; final failures produce
//! exactly one `updater-error`. Nothing here ever takes the host down.

pub mod digest;
pub mod feed;
pub mod retry;
pub mod version;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use feed::{HttpFeed, NoFeed};
pub use retry::{FailureKind, RetryPolicy, UpdateFailure};

use crate::config::UpdateConfig;
use crate::events::{percent_of, EventBus, HostEvent, UpdateProgress};
use crate::timer::sleep_or_cancel;

/// Returned when a check is requested while updates are turned off
pub const DISABLED_MESSAGE: &str = "updates are disabled in development mode";

const CHECK_IN_PROGRESS: &str = "update check already in progress";
const DOWNLOAD_IN_PROGRESS: &str = "update download already in progress";
const NOTHING_DOWNLOADED: &str = "no update has been downloaded";

/// Update lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Idle,
    Checking,
    NotAvailable,
    Available,
    Downloading,
    Downloaded,
    Installing,
    /// Retries exhausted; the next check starts over
    Failed,
}

impl UpdatePhase {
    /// An update has been found and is being fetched or applied
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Downloading | Self::Downloaded | Self::Installing)
    }
}

/// Raw download counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub percent: u8,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub bytes_per_second: u64,
}

/// Snapshot of the orchestrator state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateState {
    pub current_version: String,
    pub candidate_version: Option<String>,
    pub phase: UpdatePhase,
    pub progress: Option<TransferProgress>,
    /// Failed attempts in the current check or download
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Published release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateArtifact {
    pub version: String,
    pub url: String,
    pub size: Option<u64>,
    pub release_date: Option<String>,
    /// Base64 SHA-512 of the artifact, checked before install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
}

/// Progress reported by a transport while downloading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub transferred: u64,
    pub total: u64,
    pub bytes_per_second: u64,
}

/// Where updates come from and how they are applied
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    /// Fetch the latest published release, if any
    async fn check(&self) -> Result<Option<UpdateArtifact>, UpdateFailure>;

    /// Download an artifact, reporting progress; returns the installer path
    async fn download(
        &self,
        artifact: &UpdateArtifact,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<PathBuf, UpdateFailure>;

    /// Hand over to the installer. Production transports do not return on success.
    async fn quit_and_install(&self, installer: &Path) -> Result<(), UpdateFailure>;
}

/// Outcome of a successful check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub update_available: bool,
    pub version: Option<String>,
    pub current_version: String,
}

/// Response to `check-for-updates`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateCheckResponse {
    fn ok(result: CheckResult) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed check
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Response to commands with no payload (`quit-and-install`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    /// Successful command
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed command
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

enum RetryError {
    Cancelled,
    Exhausted(UpdateFailure),
}

/// Update orchestrator
///
/// Cheap to clone; clones share state, timers and background tasks.
#[derive(Clone)]
pub struct UpdateOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn UpdateTransport>,
    events: EventBus,
    config: UpdateConfig,
    state: Mutex<UpdateState>,
    artifact: Mutex<Option<UpdateArtifact>>,
    installer: Mutex<Option<PathBuf>>,
    check_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl UpdateOrchestrator {
    /// Create an orchestrator for the running `current_version`
    #[must_use]
    pub fn new(
        transport: Arc<dyn UpdateTransport>,
        events: EventBus,
        current_version: impl Into<String>,
        config: UpdateConfig,
    ) -> Self {
        let state = UpdateState {
            current_version: current_version.into(),
            candidate_version: None,
            phase: UpdatePhase::Idle,
            progress: None,
            retry_count: 0,
            last_error: None,
        };
        Self {
            inner: Arc::new(Inner {
                transport,
                events,
                config,
                state: Mutex::new(state),
                artifact: Mutex::new(None),
                installer: Mutex::new(None),
                check_lock: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Whether update checks run at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Version of the running build
    #[must_use]
    pub fn current_version(&self) -> String {
        self.lock_state().current_version.clone()
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.lock_state().clone()
    }

    /// Start the automatic check schedule
    ///
    /// First check after `initial_delay`, then one every `check_interval`.
    pub fn start(&self) {
        if !self.is_enabled() {
            tracing::info!("automatic updates disabled");
            return;
        }

        let this = self.clone();
        self.inner.tracker.spawn(async move {
            let config = &this.inner.config;
            let cancel = this.inner.cancel.clone();

            if !sleep_or_cancel(&cancel, config.initial_delay).await {
                return;
            }
            tracing::info!("starting automatic update check");
            this.run_check(config.max_attempts).await;

            while sleep_or_cancel(&cancel, config.check_interval).await {
                tracing::debug!("periodic update check");
                this.run_check(config.periodic_attempts).await;
            }
        });
    }

    /// Check for updates now (user-triggered)
    pub async fn check_for_updates(&self) -> UpdateCheckResponse {
        if !self.is_enabled() {
            return UpdateCheckResponse::failed(DISABLED_MESSAGE);
        }
        tracing::info!("manual update check requested");
        self.run_check(self.inner.config.max_attempts).await
    }

    async fn run_check(&self, attempts: u32) -> UpdateCheckResponse {
        let Ok(_guard) = self.inner.check_lock.try_lock() else {
            tracing::debug!("update check already running, coalescing");
            return UpdateCheckResponse::failed(CHECK_IN_PROGRESS);
        };

        let current = {
            let mut state = self.lock_state();
            if state.phase.is_busy() {
                return UpdateCheckResponse::ok(CheckResult {
                    update_available: true,
                    version: state.candidate_version.clone(),
                    current_version: state.current_version.clone(),
                });
            }
            state.phase = UpdatePhase::Checking;
            state.retry_count = 0;
            state.last_error = None;
            state.current_version.clone()
        };
        tracing::info!("checking for update");
        self.inner.events.updater_message("Checking for new versions...");

        let policy = RetryPolicy::new(attempts, self.inner.config.backoff_step);
        let transport = &self.inner.transport;
        let outcome = self.with_retries(policy, "check", || transport.check()).await;

        match outcome {
            Ok(Some(artifact))
                if version::is_newer(&current, &artifact.version, self.inner.config.allow_prerelease) =>
            {
                let version = artifact.version.clone();
                self.announce_available(artifact);
                UpdateCheckResponse::ok(CheckResult {
                    update_available: true,
                    version: Some(version),
                    current_version: current,
                })
            }
            Ok(latest) => {
                if let Some(artifact) = latest {
                    tracing::debug!(latest = %artifact.version, "published release is not newer");
                }
                self.update_state(|s| s.phase = UpdatePhase::NotAvailable);
                tracing::info!(version = %current, "update not available");
                self.inner
                    .events
                    .updater_message(format!("You already have the latest version (v{current})"));
                UpdateCheckResponse::ok(CheckResult {
                    update_available: false,
                    version: None,
                    current_version: current,
                })
            }
            Err(RetryError::Cancelled) => UpdateCheckResponse::failed("update check cancelled"),
            Err(RetryError::Exhausted(failure)) => {
                let message = self.fail(&failure);
                UpdateCheckResponse::failed(message)
            }
        }
    }

    fn announce_available(&self, artifact: UpdateArtifact) {
        let version = artifact.version.clone();
        tracing::info!(%version, "update available");
        *lock(&self.inner.artifact) = Some(artifact);
        self.update_state(|s| {
            s.phase = UpdatePhase::Available;
            s.candidate_version = Some(version.clone());
        });

        if self.inner.config.auto_download {
            self.inner.events.updater_message(format!(
                "New version available (v{version}) - downloading automatically..."
            ));
            if self.claim_download() {
                let this = self.clone();
                self.inner
                    .tracker
                    .spawn(async move { this.download_and_install(true).await });
            }
        } else {
            self.inner
                .events
                .updater_message(format!("New version available (v{version})"));
        }
    }

    /// Move `Available → Downloading`; false if another caller got there first
    fn claim_download(&self) -> bool {
        let mut state = self.lock_state();
        if state.phase != UpdatePhase::Available {
            return false;
        }
        state.phase = UpdatePhase::Downloading;
        state.progress = None;
        state.retry_count = 0;
        true
    }

    /// Download a claimed update, verify it, then install
    async fn download_and_install(&self, countdown: bool) {
        let Some(artifact) = lock(&self.inner.artifact).clone() else {
            self.update_state(|s| s.phase = UpdatePhase::Idle);
            return;
        };
        let version = artifact.version.clone();
        tracing::info!(%version, "downloading update");

        let on_progress = |p: DownloadProgress| self.report_progress(p);
        let policy = RetryPolicy::new(self.inner.config.max_attempts, self.inner.config.backoff_step);
        let transport = &self.inner.transport;
        let (artifact, on_progress) = (&artifact, &on_progress);
        let outcome = self
            .with_retries(policy, "download", move || async move {
                let path = transport.download(artifact, on_progress).await?;
                digest::verify(&path, artifact).await?;
                Ok::<_, UpdateFailure>(path)
            })
            .await;

        let installer = match outcome {
            Ok(path) => path,
            Err(RetryError::Cancelled) => return,
            Err(RetryError::Exhausted(failure)) => {
                self.fail(&failure);
                return;
            }
        };

        *lock(&self.inner.installer) = Some(installer);
        self.update_state(|s| s.phase = UpdatePhase::Downloaded);
        tracing::info!(%version, "update downloaded");

        if countdown {
            let secs = self.inner.config.install_countdown_secs;
            self.inner.events.updater_message(format!(
                "Update v{version} downloaded - restarting in {secs} seconds to finish installing..."
            ));
            if !self.countdown(&version, secs).await {
                return;
            }
        }
        self.install().await;
    }

    fn report_progress(&self, p: DownloadProgress) {
        let percent = percent_of(p.transferred, p.total);
        self.update_state(|s| {
            s.progress = Some(TransferProgress {
                percent,
                transferred_bytes: p.transferred,
                total_bytes: p.total,
                bytes_per_second: p.bytes_per_second,
            });
        });
        let event = UpdateProgress::from_bytes(p.transferred, p.total, p.bytes_per_second);
        tracing::debug!(
            percent = event.percent,
            transferred_mb = event.transferred,
            total_mb = event.total,
            speed_kbps = event.speed,
            "download progress"
        );
        self.inner.events.publish(HostEvent::UpdaterProgress(event));
    }

    /// Count down once per second; false if cancelled
    async fn countdown(&self, version: &str, secs: u32) -> bool {
        let mut remaining = secs;
        while remaining > 0 {
            if !sleep_or_cancel(&self.inner.cancel, Duration::from_secs(1)).await {
                tracing::debug!("install countdown cancelled");
                return false;
            }
            remaining -= 1;
            if remaining > 0 {
                let unit = if remaining > 1 { "seconds" } else { "second" };
                self.inner.events.updater_message(format!(
                    "Update v{version} ready - restarting in {remaining} {unit}..."
                ));
            }
        }
        true
    }

    /// Install a downloaded update now (user-triggered)
    ///
    /// In manual download mode an available update is downloaded first.
    pub async fn quit_and_install(&self) -> CommandResponse {
        tracing::info!("quit and install requested");
        match self.state().phase {
            UpdatePhase::Downloaded | UpdatePhase::Installing => self.install().await,
            UpdatePhase::Available if self.claim_download() => {
                let this = self.clone();
                self.inner
                    .tracker
                    .spawn(async move { this.download_and_install(false).await });
                CommandResponse::ok()
            }
            UpdatePhase::Available | UpdatePhase::Downloading => {
                CommandResponse::failed(DOWNLOAD_IN_PROGRESS)
            }
            _ => CommandResponse::failed(NOTHING_DOWNLOADED),
        }
    }

    async fn install(&self) -> CommandResponse {
        let claimed = {
            let mut state = self.lock_state();
            match state.phase {
                UpdatePhase::Downloaded => {
                    state.phase = UpdatePhase::Installing;
                    true
                }
                UpdatePhase::Installing => false,
                _ => return CommandResponse::failed(NOTHING_DOWNLOADED),
            }
        };
        if !claimed {
            return CommandResponse::ok();
        }

        let Some(installer) = lock(&self.inner.installer).clone() else {
            self.update_state(|s| s.phase = UpdatePhase::Idle);
            return CommandResponse::failed(NOTHING_DOWNLOADED);
        };

        self.inner.events.updater_message("Installing update...");
        tracing::info!(installer = %installer.display(), "installing update");
        match self.inner.transport.quit_and_install(&installer).await {
            Ok(()) => CommandResponse::ok(),
            Err(failure) => {
                let message = self.fail(&failure);
                CommandResponse::failed(message)
            }
        }
    }

    /// Run `op` under `policy`, announcing retries and sleeping between attempts
    async fn with_retries<T, F, Fut>(
        &self,
        policy: RetryPolicy,
        what: &str,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpdateFailure>>,
    {
        let mut attempt = 1;
        loop {
            tracing::info!(attempt, max = policy.max_attempts, "update {what} attempt");
            if attempt > 1 {
                self.inner.events.updater_message(format!(
                    "Retrying update {what} ({attempt}/{})...",
                    policy.max_attempts
                ));
            }

            let failure = match op().await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            tracing::warn!(
                attempt,
                kind = %failure.kind,
                error = %failure.message,
                "update {what} failed"
            );
            self.update_state(|s| {
                s.retry_count = attempt;
                s.last_error = Some(failure.message.clone());
            });

            let Some(delay) = policy.delay_after(attempt) else {
                return Err(RetryError::Exhausted(failure));
            };
            self.inner
                .events
                .updater_message(format!("Retrying in {} seconds...", delay.as_secs()));
            if !sleep_or_cancel(&self.inner.cancel, delay).await {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
        }
    }

    /// Record a final failure and emit the single `updater-error`
    fn fail(&self, failure: &UpdateFailure) -> String {
        let message = failure.describe();
        tracing::error!(kind = %failure.kind, error = %failure.message, "update failed");
        self.update_state(|s| {
            s.phase = UpdatePhase::Failed;
            s.last_error = Some(failure.message.clone());
        });
        self.inner.events.updater_error(message.clone());
        message
    }

    /// Cancel the schedule, backoff sleeps and any pending countdown
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::debug!("update orchestrator stopped");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, UpdateState> {
        lock(&self.inner.state)
    }

    fn update_state(&self, f: impl FnOnce(&mut UpdateState)) {
        f(&mut self.lock_state());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    struct ScriptedTransport {
        checks: Mutex<VecDeque<Result<Option<UpdateArtifact>, UpdateFailure>>>,
    }

    #[async_trait]
    impl UpdateTransport for ScriptedTransport {
        async fn check(&self) -> Result<Option<UpdateArtifact>, UpdateFailure> {
            lock(&self.checks).pop_front().unwrap_or(Ok(None))
        }

        async fn download(
            &self,
            _artifact: &UpdateArtifact,
            progress: &(dyn Fn(DownloadProgress) + Send + Sync),
        ) -> Result<PathBuf, UpdateFailure> {
            progress(DownloadProgress {
                transferred: 10,
                total: 10,
                bytes_per_second: 10,
            });
            Ok(PathBuf::from("/tmp/installer"))
        }

        async fn quit_and_install(&self, _installer: &Path) -> Result<(), UpdateFailure> {
            Ok(())
        }
    }

    fn orchestrator(
        checks: Vec<Result<Option<UpdateArtifact>, UpdateFailure>>,
        config: UpdateConfig,
    ) -> UpdateOrchestrator {
        let transport = Arc::new(ScriptedTransport {
            checks: Mutex::new(checks.into()),
        });
        UpdateOrchestrator::new(transport, EventBus::new(), "1.0.0", config)
    }

    fn artifact(version: &str) -> UpdateArtifact {
        UpdateArtifact {
            version: version.to_string(),
            url: "a.bin".to_string(),
            size: None,
            release_date: None,
            sha512: None,
        }
    }

    #[tokio::test]
    async fn disabled_orchestrator_refuses_checks() {
        let updater = orchestrator(
            vec![],
            UpdateConfig {
                enabled: false,
                ..UpdateConfig::default()
            },
        );
        let response = updater.check_for_updates().await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(DISABLED_MESSAGE));
    }

    #[tokio::test]
    async fn older_release_is_not_available() {
        let updater = orchestrator(vec![Ok(Some(artifact("0.9.0")))], UpdateConfig::default());
        let response = updater.check_for_updates().await;
        assert!(response.success);
        assert!(!response.result.unwrap().update_available);
        assert_eq!(updater.state().phase, UpdatePhase::NotAvailable);
    }

    #[tokio::test]
    async fn manual_mode_waits_in_available() {
        let updater = orchestrator(
            vec![Ok(Some(artifact("1.1.0")))],
            UpdateConfig {
                auto_download: false,
                ..UpdateConfig::default()
            },
        );
        let response = updater.check_for_updates().await;
        assert!(response.result.unwrap().update_available);

        let state = updater.state();
        assert_eq!(state.phase, UpdatePhase::Available);
        assert_eq!(state.candidate_version.as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn second_install_request_during_download_is_refused() {
        let updater = orchestrator(
            vec![Ok(Some(artifact("1.1.0")))],
            UpdateConfig {
                auto_download: false,
                ..UpdateConfig::default()
            },
        );
        updater.check_for_updates().await;

        assert!(updater.quit_and_install().await.success);
        assert_eq!(updater.state().phase, UpdatePhase::Downloading);
        let second = updater.quit_and_install().await;
        assert_eq!(second.error.as_deref(), Some(DOWNLOAD_IN_PROGRESS));
    }

    #[tokio::test]
    async fn install_without_download_fails() {
        let updater = orchestrator(vec![], UpdateConfig::default());
        let response = updater.quit_and_install().await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(NOTHING_DOWNLOADED));
    }

    #[test]
    fn busy_phases() {
        assert!(UpdatePhase::Downloading.is_busy());
        assert!(!UpdatePhase::Available.is_busy());
        assert!(!UpdatePhase::Failed.is_busy());
    }
}
