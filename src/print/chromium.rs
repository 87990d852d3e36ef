//! Headless Chromium rendering surfaces
//!
//! One browser process is launched on first use and shared; every print job
//! gets its own page, which is closed when the job's surface is destroyed.
//! Uses `chromiumoxide` for the Chrome `DevTools` Protocol.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;

use super::spool::Spooler;
use super::surface::{RenderSurface, SurfaceFactory, SurfaceSpec};
use super::{Margins, PrintOptions};
use crate::{Error, Result};

const MICRONS_PER_INCH: f64 = 25_400.0;

/// Margin used for `Margins::Minimum`, in inches
const MINIMUM_MARGIN_INCHES: f64 = 0.04;

/// Surface factory backed by a shared headless Chromium
pub struct ChromiumSurfaceFactory {
    browser: Arc<Mutex<Option<Browser>>>,
    chrome_path: Option<PathBuf>,
    spooler: Arc<dyn Spooler>,
}

impl ChromiumSurfaceFactory {
    /// Create a factory; the browser is launched on the first job
    #[must_use]
    pub fn new(chrome_path: Option<PathBuf>, spooler: Arc<dyn Spooler>) -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
            chrome_path,
            spooler,
        }
    }

    async fn launch(&self) -> Result<Browser> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");

        if let Some(ref chrome_path) = self.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        let config = builder
            .build()
            .map_err(|e| Error::Browser(format!("config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::Browser(format!("launch failed: {e}")))?;

        tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        tracing::info!("print browser launched");
        Ok(browser)
    }

    /// Close the shared browser, if it was launched
    pub async fn close(&self) {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                tracing::debug!(error = %e, "browser close failed");
            }
            tracing::info!("print browser closed");
        }
    }
}

#[async_trait]
impl SurfaceFactory for ChromiumSurfaceFactory {
    async fn create(&self, spec: SurfaceSpec) -> Result<Box<dyn RenderSurface>> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let browser = guard
            .as_ref()
            .ok_or_else(|| Error::Browser("browser not running".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::Browser(format!("new page failed: {e}")))?;
        drop(guard);

        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(spec.width),
            i64::from(spec.height),
            1.0,
            false,
        ))
        .await
        .map_err(|e| Error::Browser(format!("viewport setup failed: {e}")))?;

        Ok(Box::new(ChromiumSurface {
            page: Some(page),
            spooler: Arc::clone(&self.spooler),
        }))
    }
}

struct ChromiumSurface {
    page: Option<Page>,
    spooler: Arc<dyn Spooler>,
}

impl ChromiumSurface {
    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| Error::Print("surface already destroyed".to_string()))
    }
}

#[async_trait]
impl RenderSurface for ChromiumSurface {
    async fn load_html(&mut self, html: &str) -> Result<()> {
        let page = self.page()?;
        page.set_content(html)
            .await
            .map_err(|e| Error::Print(format!("content load failed: {e}")))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| Error::Print(format!("content load failed: {e}")))?;
        Ok(())
    }

    async fn print(&mut self, options: &PrintOptions) -> Result<bool> {
        let pdf = self
            .page()?
            .pdf(pdf_params(options))
            .await
            .map_err(|e| Error::Print(format!("render failed: {e}")))?;
        self.spooler.submit(&pdf, options).await
    }

    async fn destroy(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "page close failed");
            }
        }
    }
}

/// Translate print options into a `Page.printToPDF` request
fn pdf_params(options: &PrintOptions) -> PrintToPdfParams {
    let (width, height) = options.paper.microns();
    let margin = match options.margins {
        Margins::Default => None,
        Margins::None => Some([0.0; 4]),
        Margins::Minimum => Some([MINIMUM_MARGIN_INCHES; 4]),
        Margins::Custom {
            top,
            bottom,
            left,
            right,
        } => Some([top, bottom, left, right].map(inches)),
    };

    PrintToPdfParams {
        landscape: Some(options.landscape),
        print_background: Some(options.print_background),
        paper_width: Some(inches(width)),
        paper_height: Some(inches(height)),
        margin_top: margin.map(|m| m[0]),
        margin_bottom: margin.map(|m| m[1]),
        margin_left: margin.map(|m| m[2]),
        margin_right: margin.map(|m| m[3]),
        ..PrintToPdfParams::default()
    }
}

fn inches(microns: u32) -> f64 {
    f64::from(microns) / MICRONS_PER_INCH
}
