//! Visual responses rendered in the system browser

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Error, Result};

/// Receives HTML screen updates
pub trait DisplaySink: Send + Sync {
    /// Show `html`
    ///
    /// # Errors
    ///
    /// Returns error if the update cannot be rendered
    fn display(&self, html: &[u8]) -> Result<()>;
}

/// Writes each update to one HTML file and opens it in the browser once
///
/// Later updates overwrite the file; the page reloads itself so the open tab
/// follows along.
pub struct BrowserDisplay {
    path: PathBuf,
    opener: Option<PathBuf>,
    opened: AtomicBool,
}

/// Wrapper that makes the browser tab pick up rewrites of the file
const RELOAD_HEAD: &str = r#"<meta http-equiv="refresh" content="2">"#;

impl BrowserDisplay {
    /// Create a display writing to `path`
    ///
    /// The opener (`xdg-open` or `open`) is located on `PATH`; without one the
    /// file is still written and its location logged.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let opener = ["xdg-open", "open"]
            .iter()
            .find_map(|cmd| which::which(cmd).ok());

        if opener.is_none() {
            tracing::warn!("no browser opener found, screen output will only be written to disk");
        }

        Self {
            path: path.into(),
            opener,
            opened: AtomicBool::new(false),
        }
    }

    /// Create a display in the system temp directory
    #[must_use]
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("assist-screen-out.html"))
    }

    /// Path of the rendered page
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisplaySink for BrowserDisplay {
    fn display(&self, html: &[u8]) -> Result<()> {
        let mut page = Vec::with_capacity(html.len() + RELOAD_HEAD.len());
        page.extend_from_slice(RELOAD_HEAD.as_bytes());
        page.extend_from_slice(html);
        std::fs::write(&self.path, page)
            .map_err(|e| Error::Display(format!("failed to write {}: {e}", self.path.display())))?;

        tracing::debug!(path = %self.path.display(), bytes = html.len(), "screen output updated");

        if let Some(opener) = &self.opener
            && !self.opened.swap(true, Ordering::SeqCst)
        {
            std::process::Command::new(opener)
                .arg(&self.path)
                .spawn()
                .map_err(|e| Error::Display(format!("failed to open browser: {e}")))?;
        }

        Ok(())
    }
}
