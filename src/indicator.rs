//! Listening indicator (LED or log line) shown while a turn is active

use std::path::PathBuf;

/// Signals that the assistant is listening or responding
pub trait ListeningIndicator: Send + Sync {
    /// Turn the indicator on or off
    fn set(&self, on: bool);
}

/// Indicator that only logs transitions
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl ListeningIndicator for LogIndicator {
    fn set(&self, on: bool) {
        tracing::debug!(on, "listening indicator");
    }
}

/// Indicator driven by writing `1`/`0` to a value file
///
/// Works with sysfs GPIO (`/sys/class/gpio/gpioN/value`) and LED
/// (`/sys/class/leds/<name>/brightness`) nodes.
#[derive(Debug, Clone)]
pub struct FileIndicator {
    path: PathBuf,
}

impl FileIndicator {
    /// Create an indicator writing to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ListeningIndicator for FileIndicator {
    fn set(&self, on: bool) {
        let value: &[u8] = if on { b"1" } else { b"0" };
        if let Err(e) = std::fs::write(&self.path, value) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to set indicator");
        }
    }
}
