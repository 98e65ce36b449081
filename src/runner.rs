//! Trigger arbitration and conversation chaining

use std::sync::Arc;

use crate::Result;
use crate::audio::DuplexAudioStream;
use crate::session::ConversationSession;
use crate::transport::Transport;
use crate::trigger::TriggerFlag;

/// Waits for triggers and runs conversations to completion
pub struct SessionRunner<A, T> {
    session: ConversationSession<A, T>,
    flag: Arc<TriggerFlag>,
}

impl<A, T> SessionRunner<A, T>
where
    A: DuplexAudioStream + 'static,
    T: Transport + 'static,
{
    /// Create a runner serving `flag`
    pub const fn new(session: ConversationSession<A, T>, flag: Arc<TriggerFlag>) -> Self {
        Self { session, flag }
    }

    /// Shared trigger flag
    #[must_use]
    pub const fn flag(&self) -> &Arc<TriggerFlag> {
        &self.flag
    }

    /// Session driven by this runner
    #[must_use]
    pub const fn session(&self) -> &ConversationSession<A, T> {
        &self.session
    }

    /// Session driven by this runner, mutably
    pub const fn session_mut(&mut self) -> &mut ConversationSession<A, T> {
        &mut self.session
    }

    /// Serve triggers until a conversation fails
    ///
    /// Never returns on success. The first fatal turn error stops the loop:
    /// no further triggers are served, and callers wanting to keep listening
    /// must drive [`Self::serve_next`] themselves.
    ///
    /// # Errors
    ///
    /// Returns the error of the first conversation that failed; the runner
    /// has stopped serving triggers at that point
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("waiting for trigger");
        loop {
            let turns = self.serve_next().await?;
            tracing::info!(turns, "conversation finished, waiting for trigger");
        }
    }

    /// Wait for one trigger and run the conversation it asks for
    ///
    /// Trigger delivery is disarmed while the conversation runs; the flag is
    /// cleared and re-armed afterwards, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the conversation
    pub async fn serve_next(&mut self) -> Result<u32> {
        self.flag.wait().await;
        self.flag.disarm();

        let result = self.run_conversation().await;

        self.flag.clear_and_rearm();
        result
    }

    /// Run turns of a new conversation while the service asks for follow-on
    ///
    /// Returns the number of completed turns.
    ///
    /// # Errors
    ///
    /// Returns the fatal turn error after leaving audio idle and the
    /// indicator off
    pub async fn run_conversation(&mut self) -> Result<u32> {
        self.session.begin_conversation();
        let mut turns = 0;

        loop {
            let outcome = self.turn().await?;
            turns += 1;
            if !outcome.continue_conversation {
                return Ok(turns);
            }
            tracing::debug!(turns, "continuing conversation");
        }
    }

    /// Run exactly one turn and ignore whether the service wants follow-on
    ///
    /// # Errors
    ///
    /// Returns the fatal turn error after leaving audio idle and the
    /// indicator off
    pub async fn run_single_turn(&mut self) -> Result<()> {
        self.session.begin_conversation();
        self.turn().await.map(|_| ())
    }

    async fn turn(&mut self) -> Result<crate::session::TurnOutcome> {
        match self.session.run_turn().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.session.shutdown_audio();
                tracing::error!(error = %e, "conversation aborted");
                Err(e)
            }
        }
    }
}
