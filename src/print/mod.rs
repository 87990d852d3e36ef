//! Receipt printing through ephemeral rendering surfaces
//!
//! Each job gets a fresh hidden surface: load the HTML, let styles settle,
//! print, then destroy the surface after a short grace period on a
//! background task. Failures are converted into a [`PrintResponse`] and never
//! propagate to the caller as faults.

pub mod chromium;
pub mod spool;
pub mod surface;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

pub use chromium::ChromiumSurfaceFactory;
pub use spool::{LpSpooler, Spooler};
pub use surface::{RenderSurface, SurfaceFactory, SurfaceSpec};

use crate::config::PrintConfig;
use crate::timer::sleep_or_cancel;
use crate::{Error, Result};

/// Largest accepted receipt payload, in bytes
pub const MAX_HTML_BYTES: usize = 1024 * 1024;

/// Lifecycle of one print job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintPhase {
    Created,
    Loading,
    Rendered,
    Printing,
    Closing,
    Closed,
    /// Load or print failed; the surface is still torn down
    Error,
}

/// Paper geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSize {
    Thermal80mm,
    Thermal58mm,
    A4,
    Letter,
    /// Explicit size in microns
    Custom { width: u32, height: u32 },
}

impl PaperSize {
    /// Width and height in microns (portrait)
    #[must_use]
    pub const fn microns(self) -> (u32, u32) {
        match self {
            Self::Thermal80mm => (80_000, 297_000),
            Self::Thermal58mm => (58_000, 297_000),
            Self::A4 => (210_000, 297_000),
            Self::Letter => (215_900, 279_400),
            Self::Custom { width, height } => (width, height),
        }
    }
}

impl FromStr for PaperSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "thermal80" | "thermal80mm" => Ok(Self::Thermal80mm),
            "thermal58" | "thermal58mm" => Ok(Self::Thermal58mm),
            "a4" => Ok(Self::A4),
            "letter" => Ok(Self::Letter),
            other => Err(Error::Config(format!("unknown paper size: {other}"))),
        }
    }
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thermal80mm => write!(f, "thermal80"),
            Self::Thermal58mm => write!(f, "thermal58"),
            Self::A4 => write!(f, "a4"),
            Self::Letter => write!(f, "letter"),
            Self::Custom { width, height } => write!(f, "{width}x{height}um"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Color,
    Monochrome,
}

/// Page margins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Margins {
    /// Printer default margins
    Default,
    None,
    /// Smallest margin the printer supports
    Minimum,
    /// Explicit margins in microns
    Custom {
        top: u32,
        bottom: u32,
        left: u32,
        right: u32,
    },
}

/// Options applied to a print job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintOptions {
    pub paper: PaperSize,
    pub color: ColorMode,
    pub margins: Margins,
    pub copies: u16,
    /// Target printer; system default when unset
    pub device_name: Option<String>,
    /// Skip the print dialog
    pub silent: bool,
    pub landscape: bool,
    pub print_background: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            paper: PaperSize::A4,
            color: ColorMode::Color,
            margins: Margins::Default,
            copies: 1,
            device_name: None,
            silent: false,
            landscape: false,
            print_background: true,
        }
    }
}

/// Result of a print request, as returned to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintResponse {
    pub success: bool,
    /// `false` when the user cancelled the dialog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printed: Option<bool>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl PrintResponse {
    /// Job ran to completion (printed or cancelled by the user)
    #[must_use]
    pub fn completed(job_id: Uuid, printed: bool) -> Self {
        Self {
            success: true,
            printed: Some(printed),
            message: if printed {
                "Document printed successfully".to_string()
            } else {
                "Print cancelled by user".to_string()
            },
            error: None,
            job_id: Some(job_id),
        }
    }

    /// Job failed before or while printing
    #[must_use]
    pub fn failed(job_id: Option<Uuid>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            printed: None,
            message: "Print error - check that the printer is connected".to_string(),
            error: Some(error.into()),
            job_id,
        }
    }
}

/// Check a receipt payload before any surface is allocated
///
/// # Errors
///
/// Returns a description of the problem when the payload is empty or larger
/// than [`MAX_HTML_BYTES`]
pub fn validate_html(html: &str) -> std::result::Result<(), String> {
    if html.trim().is_empty() {
        return Err("receipt content is empty".to_string());
    }
    if html.len() > MAX_HTML_BYTES {
        return Err(format!(
            "receipt content is {} bytes, limit is {MAX_HTML_BYTES}",
            html.len()
        ));
    }
    Ok(())
}

type JobTable = Arc<Mutex<HashMap<Uuid, PrintPhase>>>;

/// Print orchestrator
///
/// Jobs run concurrently up to `max_concurrent_jobs`; further jobs wait in
/// arrival order. A job holds its slot until its surface is destroyed.
pub struct PrintOrchestrator {
    factory: Arc<dyn SurfaceFactory>,
    config: PrintConfig,
    permits: Arc<Semaphore>,
    jobs: JobTable,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl PrintOrchestrator {
    /// Create an orchestrator allocating surfaces from `factory`
    #[must_use]
    pub fn new(factory: Arc<dyn SurfaceFactory>, config: PrintConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            factory,
            config,
            permits,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Print `html` with the configured default options
    pub async fn print(&self, html: &str) -> PrintResponse {
        self.print_with(html, self.config.options.clone()).await
    }

    /// Print `html` with explicit options
    ///
    /// Returns once the print call completes; the surface is destroyed
    /// afterwards in the background.
    pub async fn print_with(&self, html: &str, options: PrintOptions) -> PrintResponse {
        if let Err(reason) = validate_html(html) {
            tracing::warn!(%reason, "rejected print request");
            return PrintResponse::failed(None, reason);
        }

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return PrintResponse::failed(None, "printing is shut down");
        };

        let id = Uuid::new_v4();
        self.set_phase(id, PrintPhase::Created);
        tracing::debug!(job = %id, bytes = html.len(), "print job created");

        let mut surface = match self.factory.create(SurfaceSpec::for_options(&options)).await {
            Ok(surface) => surface,
            Err(e) => {
                tracing::error!(job = %id, error = %e, "failed to create print surface");
                self.set_phase(id, PrintPhase::Error);
                self.finish(id);
                return PrintResponse::failed(Some(id), e.to_string());
            }
        };

        let response = match self.run(id, surface.as_mut(), html, &options).await {
            Ok(printed) => {
                tracing::info!(job = %id, printed, "print job finished");
                PrintResponse::completed(id, printed)
            }
            Err(e) => {
                tracing::error!(job = %id, error = %e, "print job failed");
                self.set_phase(id, PrintPhase::Error);
                PrintResponse::failed(Some(id), e.to_string())
            }
        };

        self.schedule_close(id, surface, permit);
        response
    }

    async fn run(
        &self,
        id: Uuid,
        surface: &mut dyn RenderSurface,
        html: &str,
        options: &PrintOptions,
    ) -> Result<bool> {
        self.set_phase(id, PrintPhase::Loading);
        surface.load_html(html).await?;

        self.set_phase(id, PrintPhase::Rendered);
        if !sleep_or_cancel(&self.cancel, self.config.settle_delay).await {
            return Err(Error::Print("printing is shut down".to_string()));
        }

        self.set_phase(id, PrintPhase::Printing);
        surface.print(options).await
    }

    fn schedule_close(
        &self,
        id: Uuid,
        mut surface: Box<dyn RenderSurface>,
        permit: OwnedSemaphorePermit,
    ) {
        self.set_phase(id, PrintPhase::Closing);
        let cancel = self.cancel.clone();
        let grace = self.config.close_grace;
        let jobs = Arc::clone(&self.jobs);

        self.tracker.spawn(async move {
            sleep_or_cancel(&cancel, grace).await;
            surface.destroy().await;
            remove_job(&jobs, id);
            drop(permit);
            tracing::debug!(job = %id, "print surface closed");
        });
    }

    fn set_phase(&self, id: Uuid, phase: PrintPhase) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(id, phase);
    }

    fn finish(&self, id: Uuid) {
        remove_job(&self.jobs, id);
    }

    /// Phase of a live job; `None` once the job is closed or unknown
    #[must_use]
    pub fn job_phase(&self, id: Uuid) -> Option<PrintPhase> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
    }

    /// Every job whose surface has not been destroyed yet
    #[must_use]
    pub fn live_jobs(&self) -> Vec<(Uuid, PrintPhase)> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, phase)| (*id, *phase))
            .collect()
    }

    /// Options applied by [`PrintOrchestrator::print`]
    #[must_use]
    pub const fn default_options(&self) -> &PrintOptions {
        &self.config.options
    }

    /// Stop accepting jobs and destroy every pending surface now
    pub async fn shutdown(&self) {
        self.permits.close();
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("print orchestrator stopped");
    }
}

fn remove_job(jobs: &JobTable, id: Uuid) {
    jobs.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
}
