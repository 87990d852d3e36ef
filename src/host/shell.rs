//! Window and process control

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Window and process controls the host can exercise
#[async_trait]
pub trait Shell: Send + Sync {
    async fn minimize(&self) -> Result<()>;

    async fn is_maximized(&self) -> bool;

    async fn maximize(&self) -> Result<()>;

    async fn unmaximize(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn open_dev_tools(&self) -> Result<()>;

    /// Restart the application process
    async fn relaunch(&self) -> Result<()>;
}

/// Main window state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Normal,
    Minimized,
    Maximized,
    Closed,
}

/// Shell without a window system
///
/// Tracks window state and logs every action. Built with
/// [`HeadlessShell::process`], relaunch restarts the current executable.
#[derive(Debug)]
pub struct HeadlessShell {
    window: Mutex<WindowState>,
    dev_tools_open: AtomicBool,
    relaunches: AtomicUsize,
    restart_process: bool,
    closed: CancellationToken,
}

impl Default for HeadlessShell {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessShell {
    /// Shell that only records actions
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: Mutex::new(WindowState::Normal),
            dev_tools_open: AtomicBool::new(false),
            relaunches: AtomicUsize::new(0),
            restart_process: false,
            closed: CancellationToken::new(),
        }
    }

    /// Shell whose relaunch replaces the running process
    #[must_use]
    pub fn process() -> Self {
        Self {
            restart_process: true,
            ..Self::new()
        }
    }

    /// Current window state
    #[must_use]
    pub fn window_state(&self) -> WindowState {
        *self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn dev_tools_open(&self) -> bool {
        self.dev_tools_open.load(Ordering::SeqCst)
    }

    /// Relaunches requested so far
    #[must_use]
    pub fn relaunch_count(&self) -> usize {
        self.relaunches.load(Ordering::SeqCst)
    }

    /// Cancelled once the window is closed
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn set_window(&self, state: WindowState) -> Result<()> {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if *window == WindowState::Closed {
            return Err(Error::Shell("window is closed".to_string()));
        }
        tracing::debug!(from = ?*window, to = ?state, "window state change");
        *window = state;
        Ok(())
    }
}

#[async_trait]
impl Shell for HeadlessShell {
    async fn minimize(&self) -> Result<()> {
        self.set_window(WindowState::Minimized)
    }

    async fn is_maximized(&self) -> bool {
        self.window_state() == WindowState::Maximized
    }

    async fn maximize(&self) -> Result<()> {
        self.set_window(WindowState::Maximized)
    }

    async fn unmaximize(&self) -> Result<()> {
        self.set_window(WindowState::Normal)
    }

    async fn close(&self) -> Result<()> {
        self.set_window(WindowState::Closed)?;
        self.closed.cancel();
        tracing::info!("main window closed");
        Ok(())
    }

    async fn open_dev_tools(&self) -> Result<()> {
        self.dev_tools_open.store(true, Ordering::SeqCst);
        tracing::info!("dev tools opened");
        Ok(())
    }

    async fn relaunch(&self) -> Result<()> {
        self.relaunches.fetch_add(1, Ordering::SeqCst);
        tracing::info!("relaunch requested");
        if !self.restart_process {
            return Ok(());
        }

        let exe = std::env::current_exe()?;
        std::process::Command::new(&exe)
            .args(std::env::args_os().skip(1))
            .spawn()
            .map_err(|e| Error::Shell(format!("failed to relaunch {}: {e}", exe.display())))?;
        std::process::exit(0);
    }
}
