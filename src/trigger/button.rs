//! Push button read from a sysfs-style value file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{TriggerFlag, TriggerHandle, TriggerSource};
use crate::Result;

/// Default interval between reads of the button value
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Fires when a button value file goes from released to pressed
///
/// The file holds `1` while pressed (e.g. `/sys/class/gpio/gpio23/value`);
/// with `active_low` it holds `0` while pressed.
#[derive(Debug, Clone)]
pub struct ButtonTrigger {
    path: PathBuf,
    poll_interval: Duration,
    active_low: bool,
}

impl ButtonTrigger {
    /// Create a trigger reading `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            active_low: false,
        }
    }

    /// Override the polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Treat `0` as pressed
    #[must_use]
    pub const fn active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    /// Read the current button level; unreadable files count as released
    async fn is_pressed(&self) -> bool {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(value) => (value.trim() == "1") != self.active_low,
            Err(e) => {
                tracing::trace!(path = %self.path.display(), error = %e, "button unreadable");
                false
            }
        }
    }

    async fn run(self, flag: Arc<TriggerFlag>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut was_pressed = false;

        loop {
            interval.tick().await;
            let pressed = self.is_pressed().await;
            if pressed && !was_pressed {
                tracing::debug!(path = %self.path.display(), "button pressed");
                flag.fire("button");
            }
            was_pressed = pressed;
        }
    }
}

impl TriggerSource for ButtonTrigger {
    fn name(&self) -> &'static str {
        "button"
    }

    fn spawn(self: Box<Self>, flag: Arc<TriggerFlag>) -> Result<TriggerHandle> {
        let task = tokio::spawn(self.run(flag));
        Ok(TriggerHandle::task("button", task))
    }
}
