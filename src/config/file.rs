//! TOML configuration file loading
//!
//! Supports `~/.config/kiosk-bridge/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct KioskConfigFile {
    /// Development build: enables dev tools, disables updates
    #[serde(default)]
    pub dev_mode: Option<bool>,

    /// Message bridge settings
    #[serde(default)]
    pub bridge: BridgeFileConfig,

    /// Receipt printing settings
    #[serde(default)]
    pub print: PrintFileConfig,

    /// Software update settings
    #[serde(default)]
    pub update: UpdateFileConfig,

    /// Session expiry watcher settings
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Message bridge configuration
#[derive(Debug, Default, Deserialize)]
pub struct BridgeFileConfig {
    /// Calls allowed per channel per window
    pub rate_limit: Option<u32>,
    /// Window length in milliseconds
    pub rate_window_ms: Option<u64>,
    /// Calls slower than this are logged
    pub slow_call_ms: Option<u64>,
}

/// Receipt printing configuration
#[derive(Debug, Default, Deserialize)]
pub struct PrintFileConfig {
    /// Delay between load completion and printing
    pub settle_delay_ms: Option<u64>,
    /// Delay between print return and surface teardown
    pub close_grace_ms: Option<u64>,
    /// Maximum live rendering surfaces
    pub max_concurrent_jobs: Option<usize>,
    /// Paper preset (`thermal80`, `thermal58`, `a4`, `letter`)
    pub paper: Option<String>,
    /// Target printer; system default when unset
    pub device_name: Option<String>,
    pub copies: Option<u16>,
    pub monochrome: Option<bool>,
    pub landscape: Option<bool>,
    /// Skip the print dialog
    pub silent: Option<bool>,
    /// Chrome/Chromium executable for rendering surfaces
    pub chrome_path: Option<String>,
    /// Spooler program (defaults to `lp`)
    pub spooler: Option<String>,
}

/// Software update configuration
#[derive(Debug, Default, Deserialize)]
pub struct UpdateFileConfig {
    pub enabled: Option<bool>,
    /// Base URL serving `latest.json`
    pub feed_url: Option<String>,
    pub auto_download: Option<bool>,
    pub allow_prerelease: Option<bool>,
    pub initial_delay_secs: Option<u64>,
    pub check_interval_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub periodic_attempts: Option<u32>,
    pub backoff_step_secs: Option<u64>,
    pub install_countdown_secs: Option<u32>,
    pub download_dir: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Session expiry watcher configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub poll_interval_secs: Option<u64>,
    pub warning_threshold_secs: Option<u64>,
    /// File the auth layer persists the bearer token into
    pub token_file: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `KioskConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> KioskConfigFile {
    let Some(path) = config_file_path() else {
        return KioskConfigFile::default();
    };

    if !path.exists() {
        return KioskConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            KioskConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file can't be read or isn't valid TOML
pub fn read_config_file(path: &Path) -> Result<KioskConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/kiosk-bridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("kiosk-bridge").join("config.toml"))
}
