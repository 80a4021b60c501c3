// src/fetch/render.rs

//! Headless page rendering behind a bounded pool.
//!
//! The renderer contract is a trait; the shipped implementation shells out
//! to a headless browser command. Anything that can turn a URL into a
//! rendered DOM string satisfies it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{AppError, Result};

/// Produces the rendered DOM for a URL.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;
}

/// Renderer that runs a headless-browser command and captures stdout.
///
/// The command template substitutes `{url}`; the default is
/// `chromium --headless=new --disable-gpu --dump-dom {url}`.
pub struct CommandRenderer {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl PageRenderer for CommandRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        let args: Vec<String> = self
            .command
            .iter()
            .map(|a| a.replace("{url}", url))
            .collect();
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| AppError::config("render_command is empty"))?;

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(program)
                .args(rest)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| AppError::validation(format!("render of {url} timed out")))??;

        if !output.status.success() {
            return Err(AppError::validation(format!(
                "renderer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).chars().take(200).collect::<String>()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Bounded lease pool in front of a renderer.
///
/// At most `max_browsers` renders run concurrently; callers queue on the
/// semaphore. Shutdown closes the semaphore so no new lease is granted.
pub struct BrowserPool {
    renderer: Box<dyn PageRenderer>,
    permits: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(renderer: Box<dyn PageRenderer>, max_browsers: usize) -> Self {
        Self {
            renderer,
            permits: Arc::new(Semaphore::new(max_browsers.max(1))),
        }
    }

    /// Lease a browser slot and render.
    pub async fn render(&self, url: &str) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::validation("browser pool is shut down"))?;
        self.renderer.render(url).await
    }

    /// Stop granting leases; in-flight renders finish.
    pub async fn shutdown(&self) {
        self.permits.close();
    }
}
