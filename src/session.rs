//! One logical conversation with the assistant service
//!
//! [`ConversationSession::run_turn`] drives a single exchange from "start
//! recording" to "finished playing the response". Between turns the session
//! keeps the service's conversation state and whether the next request opens
//! a new conversation. A failed attempt rolls both back, so a retried attempt
//! sends exactly what the failed one sent.

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, future, stream};
use serde_json::Value;
use tokio::time::{Instant, timeout_at};

use crate::actions::{ActionHandle, DeviceActionDispatcher};
use crate::audio::DuplexAudioStream;
use crate::config::DeviceIdentity;
use crate::display::DisplaySink;
use crate::indicator::{ListeningIndicator, LogIndicator};
use crate::protocol::{
    AssistRequest, AssistResponse, AudioEncoding, AudioInConfig, AudioOutConfig,
    ConversationState, DeviceConfig, DialogStateIn, MicrophoneMode, ScreenMode, ScreenOutConfig,
    TurnRequestConfig, TurnResponseEvent,
};
use crate::retry::{RetryPolicy, is_retryable, retry_with};
use crate::transport::Transport;
use crate::{Result, TransportError, TransportStatus};

/// Fixed per-session settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Language code sent with every turn
    pub language_code: String,
    /// Registered device identity
    pub device: DeviceIdentity,
    /// Ask for and render visual responses
    pub display: bool,
    /// Bound on one whole exchange
    pub deadline: Duration,
}

/// Result of a completed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    /// The service expects the user to speak again without a new trigger
    pub continue_conversation: bool,
}

/// Per-attempt bookkeeping
#[derive(Default)]
struct TurnProgress {
    continue_conversation: bool,
    actions: Vec<ActionHandle>,
}

/// Drives turns of one conversation over a duplex audio stream
pub struct ConversationSession<A, T> {
    audio: A,
    transport: T,
    settings: SessionSettings,
    conversation_state: Option<ConversationState>,
    is_new_conversation: bool,
    dispatcher: Arc<dyn DeviceActionDispatcher>,
    display: Option<Arc<dyn DisplaySink>>,
    indicator: Arc<dyn ListeningIndicator>,
    retry: RetryPolicy,
}

impl<A, T> ConversationSession<A, T>
where
    A: DuplexAudioStream + 'static,
    T: Transport + 'static,
{
    /// Create a session; the first turn opens a new conversation
    pub fn new(
        audio: A,
        transport: T,
        settings: SessionSettings,
        dispatcher: Arc<dyn DeviceActionDispatcher>,
    ) -> Self {
        Self {
            audio,
            transport,
            settings,
            conversation_state: None,
            is_new_conversation: true,
            dispatcher,
            display: None,
            indicator: Arc::new(LogIndicator),
            retry: RetryPolicy::default(),
        }
    }

    /// Forward visual responses to `display` when display mode is enabled
    #[must_use]
    pub fn with_display(mut self, display: Arc<dyn DisplaySink>) -> Self {
        self.display = Some(display);
        self
    }

    /// Drive `indicator` while a turn is active
    #[must_use]
    pub fn with_indicator(mut self, indicator: Arc<dyn ListeningIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Forget the previous conversation; the next request opens a new one
    pub fn begin_conversation(&mut self) {
        self.conversation_state = None;
        self.is_new_conversation = true;
    }

    /// State token that will be sent with the next turn
    #[must_use]
    pub const fn conversation_state(&self) -> Option<&ConversationState> {
        self.conversation_state.as_ref()
    }

    /// Whether the next request opens a new conversation
    #[must_use]
    pub const fn is_new_conversation(&self) -> bool {
        self.is_new_conversation
    }

    /// Fixed settings
    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Audio stream
    #[must_use]
    pub const fn audio(&self) -> &A {
        &self.audio
    }

    /// Audio stream, mutably
    pub const fn audio_mut(&mut self) -> &mut A {
        &mut self.audio
    }

    /// Indicator driven by this session
    #[must_use]
    pub fn indicator(&self) -> &Arc<dyn ListeningIndicator> {
        &self.indicator
    }

    /// Leave the audio device idle and the indicator off
    pub fn shutdown_audio(&mut self) {
        self.audio.stop_recording();
        self.audio.stop_playback();
        self.indicator.set(false);
    }

    /// Run one turn, retrying whole attempts while the service is unavailable
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Turn`] when the exchange fails for good, or the
    /// local audio error that aborted the turn
    pub async fn run_turn(&mut self) -> Result<TurnOutcome> {
        let policy = self.retry.clone();
        retry_with(&policy, is_retryable, self, |session, attempt| {
            Box::pin(session.attempt(attempt))
        })
        .await
    }

    /// One attempt; on failure the dialog state is rolled back and the
    /// device left idle
    async fn attempt(&mut self, attempt: u32) -> Result<TurnOutcome> {
        let saved_state = self.conversation_state.clone();
        let saved_is_new = self.is_new_conversation;

        let result = self.exchange(attempt).await;
        if let Err(e) = &result {
            tracing::debug!(attempt, error = %e, "turn attempt failed, restoring dialog state");
            self.conversation_state = saved_state;
            self.is_new_conversation = saved_is_new;
            self.shutdown_audio();
        }
        result
    }

    async fn exchange(&mut self, attempt: u32) -> Result<TurnOutcome> {
        let deadline = Instant::now() + self.settings.deadline;

        self.audio.start_recording()?;
        self.indicator.set(true);
        tracing::info!(attempt, "recording audio request");

        let config = self.request_config();
        self.is_new_conversation = false;

        let requests = stream::once(async move { AssistRequest::Config(Box::new(config)) })
            .chain(self.audio.produce().map(AssistRequest::AudioIn))
            .inspect(log_request)
            .boxed();

        let mut responses = match timeout_at(deadline, self.transport.assist(requests)).await {
            Ok(opened) => opened?,
            Err(_) => return Err(deadline_exceeded(self.settings.deadline).into()),
        };

        let mut turn = TurnProgress::default();
        loop {
            let Ok(next) = timeout_at(deadline, responses.next()).await else {
                return Err(deadline_exceeded(self.settings.deadline).into());
            };
            let Some(response) = next else {
                break;
            };

            let response = response?;
            log_response(&response);
            for event in response.into_events() {
                self.apply(event, &mut turn)?;
            }
        }

        // The service may close without ever signalling end of utterance
        self.audio.stop_recording();

        if !turn.actions.is_empty() {
            tracing::info!(count = turn.actions.len(), "waiting for device actions to complete");
            join_actions(turn.actions, deadline).await;
        }

        tracing::info!("finished playing assistant response");
        self.audio.stop_playback();
        self.indicator.set(false);

        Ok(TurnOutcome {
            continue_conversation: turn.continue_conversation,
        })
    }

    fn apply(&mut self, event: TurnResponseEvent, turn: &mut TurnProgress) -> Result<()> {
        match event {
            TurnResponseEvent::EndOfUtterance => {
                tracing::info!("end of audio request detected, stopping recording");
                self.audio.stop_recording();
            }
            TurnResponseEvent::SpeechTranscript(transcript) => {
                tracing::info!(transcript = %transcript, "transcript of user request");
            }
            TurnResponseEvent::AudioChunk(data) => {
                if !self.audio.is_playing() {
                    self.audio.stop_recording();
                    self.audio.start_playback()?;
                    tracing::info!("playing assistant response");
                }
                self.audio.write(&data)?;
            }
            TurnResponseEvent::ConversationStateUpdate(state) => {
                tracing::debug!(bytes = state.as_bytes().len(), "updating conversation state");
                self.conversation_state = Some(state);
            }
            TurnResponseEvent::VolumeUpdate(percent) => {
                if percent != 0 {
                    tracing::info!(percent, "setting volume");
                    self.audio.set_volume_percent(percent);
                }
            }
            TurnResponseEvent::MicrophoneModeUpdate(MicrophoneMode::FollowOn) => {
                tracing::info!("expecting follow-on query from user");
                turn.continue_conversation = true;
            }
            TurnResponseEvent::MicrophoneModeUpdate(MicrophoneMode::Close) => {
                turn.continue_conversation = false;
            }
            TurnResponseEvent::DeviceActionRequest(json) => {
                let request: Value = match serde_json::from_str(&json) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed device action");
                        return Ok(());
                    }
                };
                match self.dispatcher.dispatch(&request) {
                    Ok(handles) => turn.actions.extend(handles),
                    Err(e) => tracing::warn!(error = %e, "skipping device action"),
                }
            }
            TurnResponseEvent::DisplayUpdate(html) => {
                if self.settings.display
                    && let Some(display) = &self.display
                    && let Err(e) = display.display(&html)
                {
                    tracing::warn!(error = %e, "failed to show screen output");
                }
            }
        }

        Ok(())
    }

    /// Configuration for the first request of an attempt
    fn request_config(&self) -> TurnRequestConfig {
        let sample_rate_hertz = self.audio.sample_rate();
        TurnRequestConfig {
            audio_in_config: AudioInConfig {
                encoding: AudioEncoding::Linear16,
                sample_rate_hertz,
            },
            audio_out_config: AudioOutConfig {
                encoding: AudioEncoding::Linear16,
                sample_rate_hertz,
                volume_percentage: self.audio.volume_percent(),
            },
            dialog_state_in: DialogStateIn {
                language_code: self.settings.language_code.clone(),
                conversation_state: self.conversation_state.clone(),
                is_new_conversation: self.is_new_conversation,
            },
            device_config: DeviceConfig {
                device_id: self.settings.device.id.clone(),
                device_model_id: self.settings.device.model_id.clone(),
            },
            screen_out_config: self.settings.display.then_some(ScreenOutConfig {
                screen_mode: ScreenMode::Playing,
            }),
        }
    }
}

/// Wait for dispatched actions, abandoning whatever is still running at
/// `deadline`
async fn join_actions(actions: Vec<ActionHandle>, deadline: Instant) {
    let aborts: Vec<_> = actions.iter().map(ActionHandle::abort_handle).collect();

    let joined = timeout_at(deadline, future::join_all(actions)).await;
    match joined {
        Ok(results) => {
            for e in results.into_iter().filter_map(std::result::Result::err) {
                tracing::warn!(error = %e, "device action panicked or was cancelled");
            }
        }
        Err(_) => {
            let pending = aborts.iter().filter(|a| !a.is_finished()).count();
            tracing::warn!(pending, "device actions still running at deadline, abandoning them");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

fn deadline_exceeded(deadline: Duration) -> TransportError {
    TransportError::new(
        TransportStatus::DeadlineExceeded,
        format!("exchange exceeded {}s deadline", deadline.as_secs()),
    )
}

fn log_request(request: &AssistRequest) {
    match request {
        AssistRequest::Config(config) => tracing::debug!(config = ?config, "assist request"),
        AssistRequest::AudioIn(data) => tracing::trace!(bytes = data.len(), "assist request audio"),
    }
}

fn log_response(response: &AssistResponse) {
    tracing::debug!(
        event_type = ?response.event_type,
        speech_results = response.speech_results.len(),
        audio_bytes = response.audio_out.as_ref().map_or(0, |a| a.audio_data.len()),
        dialog_state = response.dialog_state_out.is_some(),
        device_action = response.device_action.is_some(),
        screen_out = response.screen_out.is_some(),
        "assist response"
    );
}
