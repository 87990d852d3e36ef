//! Rendering surface seam
//!
//! A surface is an off-screen, non-interactive document renderer that lives
//! for exactly one print job.

use async_trait::async_trait;

use super::PrintOptions;
use crate::Result;

/// CSS pixels per inch used to size surfaces from paper geometry
const CSS_DPI: u32 = 96;
const MICRONS_PER_INCH: u32 = 25_400;

/// Geometry of a surface to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSpec {
    /// Viewport width in CSS pixels
    pub width: u32,
    /// Viewport height in CSS pixels
    pub height: u32,
}

impl Default for SurfaceSpec {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl SurfaceSpec {
    /// Size a surface so the document lays out at the paper's width
    #[must_use]
    pub fn for_options(options: &PrintOptions) -> Self {
        let (width, height) = options.paper.microns();
        let (width, height) = if options.landscape {
            (height, width)
        } else {
            (width, height)
        };
        Self {
            width: microns_to_px(width),
            height: microns_to_px(height).max(Self::default().height),
        }
    }
}

const fn microns_to_px(microns: u32) -> u32 {
    microns / (MICRONS_PER_INCH / CSS_DPI)
}

/// Creates rendering surfaces
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    /// Allocate a fresh hidden surface
    async fn create(&self, spec: SurfaceSpec) -> Result<Box<dyn RenderSurface>>;
}

/// One live rendering surface
#[async_trait]
pub trait RenderSurface: Send {
    /// Load `html` as the sole content; resolves on load completion
    async fn load_html(&mut self, html: &str) -> Result<()>;

    /// Print the loaded document. `Ok(false)` means the user cancelled.
    async fn print(&mut self, options: &PrintOptions) -> Result<bool>;

    /// Release the surface. Called exactly once per surface.
    async fn destroy(&mut self);
}
