//! `SIGUSR2` trigger, so other processes can start a conversation

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};

use super::{TriggerFlag, TriggerHandle, TriggerSource};
use crate::Result;

/// Fires on every `SIGUSR2` delivered to the process
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTrigger;

impl TriggerSource for SignalTrigger {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn spawn(self: Box<Self>, flag: Arc<TriggerFlag>) -> Result<TriggerHandle> {
        let mut stream = signal(SignalKind::user_defined2())?;

        let task = tokio::spawn(async move {
            while stream.recv().await.is_some() {
                flag.fire("signal");
            }
        });

        Ok(TriggerHandle::task("signal", task))
    }
}
