//! Hand rendered documents to the OS print queue

use std::io::Write;

use async_trait::async_trait;

use super::{ColorMode, PrintOptions};
use crate::{Error, Result};

/// OS print queue
#[async_trait]
pub trait Spooler: Send + Sync {
    /// Queue a rendered PDF. Returns `false` if the job was not queued
    /// for a reason the user controls (e.g. a cancelled dialog).
    async fn submit(&self, pdf: &[u8], options: &PrintOptions) -> Result<bool>;
}

/// CUPS `lp` spooler
#[derive(Debug, Clone)]
pub struct LpSpooler {
    program: String,
}

impl Default for LpSpooler {
    fn default() -> Self {
        Self::new("lp")
    }
}

impl LpSpooler {
    /// Use `program` as the `lp`-compatible command
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments passed ahead of the document path
    #[must_use]
    pub fn args(options: &PrintOptions) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(device) = &options.device_name {
            args.push("-d".to_string());
            args.push(device.clone());
        }
        if options.copies > 1 {
            args.push("-n".to_string());
            args.push(options.copies.to_string());
        }
        if options.landscape {
            args.push("-o".to_string());
            args.push("landscape".to_string());
        }
        if options.color == ColorMode::Monochrome {
            args.push("-o".to_string());
            args.push("print-color-mode=monochrome".to_string());
        }
        args
    }
}

#[async_trait]
impl Spooler for LpSpooler {
    async fn submit(&self, pdf: &[u8], options: &PrintOptions) -> Result<bool> {
        if !options.silent {
            tracing::debug!("interactive dialog unavailable, printing silently");
        }

        let mut file = tempfile::Builder::new()
            .prefix("receipt-")
            .suffix(".pdf")
            .tempfile()?;
        file.write_all(pdf)?;
        file.flush()?;

        let output = tokio::process::Command::new(&self.program)
            .args(Self::args(options))
            .arg(file.path())
            .output()
            .await
            .map_err(|e| Error::Print(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Print(format!(
                "{} exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        tracing::info!(
            device = options.device_name.as_deref().unwrap_or("default"),
            bytes = pdf.len(),
            "document queued"
        );
        Ok(true)
    }
}
