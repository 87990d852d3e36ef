//! HTTP update feed
//!
//! The feed is a directory served over HTTP containing `latest.json`:
//!
//! ```json
//! {
//!   "version": "1.4.0",
//!   "url": "kiosk-bridge-1.4.0.AppImage",
//!   "size": 84213760,
//!   "sha512": "<base64 SHA-512>"
//! }
//! ```
//!
//! Relative artifact URLs are resolved against the feed URL. When `sha512`
//! is published the download is verified before it is installed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use super::retry::{FailureKind, UpdateFailure};
use super::{DownloadProgress, UpdateArtifact, UpdateTransport};
use crate::config::UpdateConfig;
use crate::{Error, Result};

/// Minimum spacing between progress callbacks, except the final one
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestManifest {
    version: String,
    url: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    sha512: Option<String>,
}

/// Update transport reading a static `latest.json` feed
pub struct HttpFeed {
    client: reqwest::Client,
    base: Url,
    download_dir: PathBuf,
    request_timeout: Duration,
}

impl HttpFeed {
    /// Create a feed client from update configuration
    ///
    /// # Errors
    ///
    /// Returns error if no feed URL is configured or it is not a valid URL
    pub fn new(config: &UpdateConfig) -> Result<Self> {
        let feed_url = config
            .feed_url
            .as_deref()
            .ok_or_else(|| Error::Config("update feed URL is not configured".to_string()))?;
        let base = Url::parse(&format!("{}/", feed_url.trim_end_matches('/')))
            .map_err(|e| Error::Config(format!("invalid update feed URL {feed_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .user_agent(concat!("kiosk-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            download_dir: config.download_dir.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn resolve(&self, url: &str) -> std::result::Result<Url, UpdateFailure> {
        self.base
            .join(url)
            .map_err(|e| UpdateFailure::new(FailureKind::Generic, format!("invalid artifact URL {url}: {e}")))
    }
}

#[async_trait]
impl UpdateTransport for HttpFeed {
    async fn check(&self) -> std::result::Result<Option<UpdateArtifact>, UpdateFailure> {
        let url = self.resolve("latest.json")?;
        tracing::debug!(%url, "fetching update manifest");

        let manifest: LatestManifest = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let url = self.resolve(&manifest.url)?;
        Ok(Some(UpdateArtifact {
            version: manifest.version,
            url: url.to_string(),
            size: manifest.size,
            release_date: manifest.release_date,
            sha512: manifest.sha512,
        }))
    }

    async fn download(
        &self,
        artifact: &UpdateArtifact,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> std::result::Result<PathBuf, UpdateFailure> {
        let url = self.resolve(&artifact.url)?;
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("kiosk-bridge-{}", artifact.version), ToString::to_string);

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(file_name);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length().or(artifact.size).unwrap_or(0);

        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        let mut transferred = 0u64;
        let mut last_report = Instant::now();
        let mut bytes_since_report = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            let len = chunk.len() as u64;
            transferred += len;
            bytes_since_report += len;

            let elapsed = last_report.elapsed();
            if elapsed >= PROGRESS_INTERVAL {
                progress(DownloadProgress {
                    transferred,
                    total,
                    bytes_per_second: per_second(bytes_since_report, elapsed),
                });
                last_report = Instant::now();
                bytes_since_report = 0;
            }
        }
        file.flush().await?;

        progress(DownloadProgress {
            transferred,
            total: total.max(transferred),
            bytes_per_second: per_second(bytes_since_report, last_report.elapsed()),
        });

        tracing::info!(path = %path.display(), bytes = transferred, "update downloaded");
        Ok(path)
    }

    async fn quit_and_install(&self, installer: &Path) -> std::result::Result<(), UpdateFailure> {
        mark_executable(installer)?;
        std::process::Command::new(installer)
            .spawn()
            .map_err(|e| UpdateFailure::new(FailureKind::Generic, format!("failed to start installer: {e}")))?;

        tracing::info!(installer = %installer.display(), "installer started, exiting");
        std::process::exit(0);
    }
}

/// Transport used when no feed is configured; every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeed;

impl NoFeed {
    fn failure() -> UpdateFailure {
        UpdateFailure::new(FailureKind::Generic, "no update feed configured")
    }
}

#[async_trait]
impl UpdateTransport for NoFeed {
    async fn check(&self) -> std::result::Result<Option<UpdateArtifact>, UpdateFailure> {
        Err(Self::failure())
    }

    async fn download(
        &self,
        _artifact: &UpdateArtifact,
        _progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> std::result::Result<PathBuf, UpdateFailure> {
        Err(Self::failure())
    }

    async fn quit_and_install(&self, _installer: &Path) -> std::result::Result<(), UpdateFailure> {
        Err(Self::failure())
    }
}

fn per_second(bytes: u64, elapsed: Duration) -> u64 {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1);
    bytes.saturating_mul(1000) / millis
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
