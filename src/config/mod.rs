//! Configuration management for the kiosk bridge
//!
//! Values are layered: built-in defaults, then the TOML file overlay, then
//! `KIOSK_*` environment variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channels::rate_limiter::{DEFAULT_LIMIT, DEFAULT_WINDOW};
use crate::print::{ColorMode, PaperSize, PrintOptions};
use crate::Result;

use self::file::KioskConfigFile;

/// Kiosk bridge configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Development build: enables dev tools, disables updates
    pub dev_mode: bool,

    /// Message bridge configuration
    pub bridge: BridgeConfig,

    /// Receipt printing configuration
    pub print: PrintConfig,

    /// Software update configuration
    pub update: UpdateConfig,

    /// Session expiry watcher configuration
    pub session: SessionConfig,
}

/// Message bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Calls allowed per channel per window
    pub rate_limit: u32,

    /// Rate limit window
    pub rate_window: Duration,

    /// Calls slower than this are logged (never aborted)
    pub slow_call_threshold: Duration,

    /// Allow `open-dev-tools` (development builds only)
    pub dev_tools: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_LIMIT,
            rate_window: DEFAULT_WINDOW,
            slow_call_threshold: Duration::from_millis(1000),
            dev_tools: false,
        }
    }
}

/// Receipt printing configuration
#[derive(Debug, Clone)]
pub struct PrintConfig {
    /// Delay after load completion so styles finish applying
    pub settle_delay: Duration,

    /// Delay after the print call returns before the surface is destroyed
    pub close_grace: Duration,

    /// Maximum live rendering surfaces; further jobs queue
    pub max_concurrent_jobs: usize,

    /// Options applied to every job
    pub options: PrintOptions,

    /// Chrome/Chromium executable (auto-detected when unset)
    pub chrome_path: Option<PathBuf>,

    /// Spooler program handed the rendered document
    pub spooler: String,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            close_grace: Duration::from_millis(1000),
            max_concurrent_jobs: 2,
            options: PrintOptions::default(),
            chrome_path: None,
            spooler: "lp".to_string(),
        }
    }
}

/// Software update configuration
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Updates are checked at all
    pub enabled: bool,

    /// Base URL serving `latest.json`
    pub feed_url: Option<String>,

    /// Start downloading as soon as an update is found
    pub auto_download: bool,

    /// Accept prerelease versions
    pub allow_prerelease: bool,

    /// Delay before the first automatic check
    pub initial_delay: Duration,

    /// Period between automatic checks
    pub check_interval: Duration,

    /// Attempts for startup and user-triggered checks
    pub max_attempts: u32,

    /// Attempts for periodic checks
    pub periodic_attempts: u32,

    /// Linear backoff step: attempt `n` waits `n * backoff_step`
    pub backoff_step: Duration,

    /// Seconds announced before install-and-restart
    pub install_countdown_secs: u32,

    /// Where downloaded artifacts are stored
    pub download_dir: PathBuf,

    /// Per-request HTTP timeout for the feed
    pub request_timeout: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_url: None,
            auto_download: true,
            allow_prerelease: false,
            initial_delay: Duration::from_secs(2),
            check_interval: Duration::from_secs(60 * 60),
            max_attempts: 3,
            periodic_attempts: 1,
            backoff_step: Duration::from_secs(2),
            install_countdown_secs: 5,
            download_dir: default_download_dir(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Session expiry watcher configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Period between token checks
    pub poll_interval: Duration,

    /// Remaining lifetime under which warnings are emitted
    pub warning_threshold: Duration,

    /// File the auth layer persists the bearer token into
    pub token_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            warning_threshold: Duration::from_secs(2 * 60),
            token_file: None,
        }
    }
}

/// Return the cache directory for downloaded updates
///
/// Uses `~/.cache/kiosk-bridge/updates/` on Linux
pub fn default_download_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "kiosk", "kiosk-bridge").map_or_else(
        || std::env::temp_dir().join("kiosk-bridge").join("updates"),
        |d| d.cache_dir().join("updates"),
    )
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// An explicit `path` must exist and parse; the default path is optional.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file can't be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => {
                let file = file::read_config_file(p)?;
                tracing::info!(path = %p.display(), "loaded config file");
                file
            }
            None => file::load_config_file(),
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Build configuration from a parsed file and an environment lookup
    #[must_use]
    pub fn from_sources(fc: KioskConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let number = |key: &str| env(key).and_then(|v| v.parse::<u64>().ok());

        let dev_mode = flag("KIOSK_DEV_MODE").or(fc.dev_mode).unwrap_or(false);

        let bridge_defaults = BridgeConfig::default();
        let bridge = BridgeConfig {
            rate_limit: env("KIOSK_RATE_LIMIT")
                .and_then(|v| v.parse().ok())
                .or(fc.bridge.rate_limit)
                .unwrap_or(bridge_defaults.rate_limit),
            rate_window: nonzero_period(
                "bridge.rate_window_ms",
                fc.bridge.rate_window_ms,
                Duration::from_millis,
                bridge_defaults.rate_window,
            ),
            slow_call_threshold: fc
                .bridge
                .slow_call_ms
                .map_or(bridge_defaults.slow_call_threshold, Duration::from_millis),
            dev_tools: dev_mode,
        };

        let print_defaults = PrintConfig::default();
        let paper = fc.print.paper.as_deref().and_then(|p| match p.parse::<PaperSize>() {
            Ok(paper) => Some(paper),
            Err(e) => {
                tracing::warn!(paper = p, error = %e, "ignoring unknown paper size");
                None
            }
        });
        let options = PrintOptions {
            paper: paper.unwrap_or(print_defaults.options.paper),
            color: if fc.print.monochrome.unwrap_or(false) {
                ColorMode::Monochrome
            } else {
                ColorMode::Color
            },
            copies: fc.print.copies.unwrap_or(print_defaults.options.copies).max(1),
            landscape: fc.print.landscape.unwrap_or(false),
            silent: fc.print.silent.unwrap_or(print_defaults.options.silent),
            device_name: env("KIOSK_PRINT_DEVICE").or(fc.print.device_name),
            ..print_defaults.options
        };
        let print = PrintConfig {
            settle_delay: fc
                .print
                .settle_delay_ms
                .map_or(print_defaults.settle_delay, Duration::from_millis),
            close_grace: fc
                .print
                .close_grace_ms
                .map_or(print_defaults.close_grace, Duration::from_millis),
            max_concurrent_jobs: fc
                .print
                .max_concurrent_jobs
                .unwrap_or(print_defaults.max_concurrent_jobs)
                .max(1),
            options,
            chrome_path: env("KIOSK_CHROME_PATH")
                .or(fc.print.chrome_path)
                .map(PathBuf::from),
            spooler: fc.print.spooler.unwrap_or(print_defaults.spooler),
        };

        let update_defaults = UpdateConfig::default();
        let update = UpdateConfig {
            enabled: flag("KIOSK_UPDATES_ENABLED")
                .or(fc.update.enabled)
                .unwrap_or(!dev_mode),
            feed_url: env("KIOSK_UPDATE_FEED_URL").or(fc.update.feed_url),
            auto_download: flag("KIOSK_AUTO_DOWNLOAD")
                .or(fc.update.auto_download)
                .unwrap_or(update_defaults.auto_download),
            allow_prerelease: fc
                .update
                .allow_prerelease
                .unwrap_or(update_defaults.allow_prerelease),
            initial_delay: fc
                .update
                .initial_delay_secs
                .map_or(update_defaults.initial_delay, Duration::from_secs),
            check_interval: nonzero_period(
                "update.check_interval_secs",
                number("KIOSK_UPDATE_INTERVAL_SECS").or(fc.update.check_interval_secs),
                Duration::from_secs,
                update_defaults.check_interval,
            ),
            max_attempts: fc
                .update
                .max_attempts
                .unwrap_or(update_defaults.max_attempts)
                .max(1),
            periodic_attempts: fc
                .update
                .periodic_attempts
                .unwrap_or(update_defaults.periodic_attempts)
                .max(1),
            backoff_step: fc
                .update
                .backoff_step_secs
                .map_or(update_defaults.backoff_step, Duration::from_secs),
            install_countdown_secs: fc
                .update
                .install_countdown_secs
                .unwrap_or(update_defaults.install_countdown_secs),
            download_dir: fc
                .update
                .download_dir
                .map_or(update_defaults.download_dir, PathBuf::from),
            request_timeout: fc
                .update
                .request_timeout_secs
                .map_or(update_defaults.request_timeout, Duration::from_secs),
        };

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            poll_interval: nonzero_period(
                "session.poll_interval_secs",
                fc.session.poll_interval_secs,
                Duration::from_secs,
                session_defaults.poll_interval,
            ),
            warning_threshold: fc
                .session
                .warning_threshold_secs
                .map_or(session_defaults.warning_threshold, Duration::from_secs),
            token_file: env("KIOSK_TOKEN_FILE")
                .or(fc.session.token_file)
                .map(PathBuf::from),
        };

        Self {
            dev_mode,
            bridge,
            print,
            update,
            session,
        }
    }
}

/// A configured period, falling back to `default` when unset or zero
fn nonzero_period(
    key: &str,
    value: Option<u64>,
    unit: fn(u64) -> Duration,
    default: Duration,
) -> Duration {
    match value {
        Some(0) => {
            tracing::warn!(key, "ignoring zero period, using default");
            default
        }
        Some(n) => unit(n),
        None => default,
    }
}
