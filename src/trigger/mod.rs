//! Conversation triggers
//!
//! Every source (button, signal, wake word) only sets the shared
//! [`TriggerFlag`]. The runner waits on the flag, disarms it while a
//! conversation is active and clears and re-arms it once the conversation
//! concludes, so triggers arriving mid-conversation are coalesced into the
//! one already being served.

mod button;
#[cfg(unix)]
mod signal;
mod stt;
mod wake_word;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub use button::ButtonTrigger;
#[cfg(unix)]
pub use signal::SignalTrigger;
pub use stt::{SpeechToText, SttProvider, Transcriber};
pub use wake_word::{DEFAULT_WAKE_PHRASE, DetectorState, WakeWordDetector, WakeWordTrigger};

use crate::Result;

/// Process-wide "begin a conversation" request flag
#[derive(Debug)]
pub struct TriggerFlag {
    pending: AtomicBool,
    armed: AtomicBool,
    notify: Notify,
}

impl Default for TriggerFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerFlag {
    /// Create an armed flag with no pending request
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            armed: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    /// Request a conversation
    ///
    /// Returns `false` if the request was coalesced into one already pending
    /// or dropped because delivery is disarmed.
    pub fn fire(&self, source: &str) -> bool {
        if !self.armed.load(Ordering::SeqCst) {
            tracing::debug!(source, "trigger ignored during conversation");
            return false;
        }

        if self.pending.swap(true, Ordering::SeqCst) {
            tracing::debug!(source, "trigger coalesced");
            return false;
        }

        tracing::info!(source, "conversation requested");
        self.notify.notify_one();
        true
    }

    /// Wait until a request is pending
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.pending.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting requests; the pending flag is left as is
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Drop the pending request and accept new ones
    pub fn clear_and_rearm(&self) {
        self.pending.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Whether new requests are accepted
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Whether a request is waiting to be served
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Something that can ask for a conversation
pub trait TriggerSource: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Start listening in the background, firing `flag` on each trigger
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be started
    fn spawn(self: Box<Self>, flag: Arc<TriggerFlag>) -> Result<TriggerHandle>;
}

/// Keeps a running trigger source alive; stopping it ends the listener
pub struct TriggerHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TriggerHandle {
    /// Handle for a source running as a tokio task
    #[must_use]
    pub fn task(name: &'static str, task: JoinHandle<()>) -> Self {
        Self {
            name,
            stop: Arc::new(AtomicBool::new(false)),
            task: Some(task),
        }
    }

    /// Handle for a source running on its own thread, polling `stop`
    #[must_use]
    pub fn thread(name: &'static str, stop: Arc<AtomicBool>) -> Self {
        Self {
            name,
            stop,
            task: None,
        }
    }

    /// Name of the source
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the listener
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::debug!(source = self.name, "trigger stopped");
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start every source against one flag
///
/// # Errors
///
/// Returns the first source that fails to start
pub fn spawn_all(
    sources: Vec<Box<dyn TriggerSource>>,
    flag: &Arc<TriggerFlag>,
) -> Result<Vec<TriggerHandle>> {
    sources
        .into_iter()
        .map(|source| {
            let name = source.name();
            let handle = source.spawn(Arc::clone(flag))?;
            tracing::info!(source = name, "trigger listening");
            Ok(handle)
        })
        .collect()
}
