//! Shared test utilities
//!
//! Fakes for every collaborator of a conversation session, each recording
//! what it was asked to do so tests can assert on ordering and content.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use assist_client::actions::{ActionHandle, DeviceActionDispatcher};
use assist_client::audio::{AudioChunks, AudioSink, AudioSource};
use assist_client::config::DeviceIdentity;
use assist_client::display::DisplaySink;
use assist_client::indicator::ListeningIndicator;
use assist_client::protocol::{
    AssistRequest, AssistResponse, AudioOut, ConversationState, DeviceAction, DialogStateOut,
    EventType, MicrophoneModeOut, ScreenOut, SpeechRecognitionResult,
};
use assist_client::transport::{RequestStream, ResponseStream};
use assist_client::{DuplexAudioStream, SessionSettings, Transport, TransportError};

/// Calls made against [`MockAudio`], in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCall {
    StartRecording,
    StopRecording,
    StartPlayback,
    StopPlayback,
    Write,
}

/// Observable state of a [`MockAudio`]
#[derive(Debug, Default)]
pub struct AudioLog {
    pub calls: Vec<AudioCall>,
    pub written: Vec<u8>,
    pub recording: bool,
    pub playing: bool,
    pub volume: u8,
}

impl AudioLog {
    /// Index of the first occurrence of `call`
    pub fn position(&self, call: AudioCall) -> Option<usize> {
        self.calls.iter().position(|c| *c == call)
    }

    pub fn count(&self, call: AudioCall) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }
}

/// Duplex audio that records calls and captures a fixed set of chunks
pub struct MockAudio {
    log: Arc<Mutex<AudioLog>>,
    chunks: Vec<Vec<u8>>,
    fail_playback: bool,
}

impl MockAudio {
    pub fn new(chunks: Vec<Vec<u8>>) -> (Self, Arc<Mutex<AudioLog>>) {
        let log = Arc::new(Mutex::new(AudioLog {
            volume: 50,
            ..AudioLog::default()
        }));
        let audio = Self {
            log: Arc::clone(&log),
            chunks,
            fail_playback: false,
        };
        (audio, log)
    }

    /// Make `start_playback` fail with an audio error
    pub fn failing_playback(mut self) -> Self {
        self.fail_playback = true;
        self
    }
}

impl DuplexAudioStream for MockAudio {
    fn start_recording(&mut self) -> assist_client::Result<()> {
        let mut log = self.log.lock().unwrap();
        if !log.recording {
            log.recording = true;
            log.calls.push(AudioCall::StartRecording);
        }
        Ok(())
    }

    fn stop_recording(&mut self) {
        let mut log = self.log.lock().unwrap();
        if log.recording {
            log.recording = false;
            log.calls.push(AudioCall::StopRecording);
        }
    }

    fn start_playback(&mut self) -> assist_client::Result<()> {
        if self.fail_playback {
            return Err(assist_client::Error::Audio("speaker unplugged".into()));
        }
        let mut log = self.log.lock().unwrap();
        if !log.playing {
            log.playing = true;
            log.calls.push(AudioCall::StartPlayback);
        }
        Ok(())
    }

    fn stop_playback(&mut self) {
        let mut log = self.log.lock().unwrap();
        if log.playing {
            log.playing = false;
            log.calls.push(AudioCall::StopPlayback);
        }
    }

    fn write(&mut self, data: &[u8]) -> assist_client::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(AudioCall::Write);
        log.written.extend_from_slice(data);
        Ok(())
    }

    fn produce(&mut self) -> AudioChunks {
        if self.log.lock().unwrap().recording {
            stream::iter(self.chunks.clone()).boxed()
        } else {
            stream::empty().boxed()
        }
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn volume_percent(&self) -> u8 {
        self.log.lock().unwrap().volume
    }

    fn set_volume_percent(&mut self, percent: u8) {
        self.log.lock().unwrap().volume = percent.min(100);
    }

    fn is_recording(&self) -> bool {
        self.log.lock().unwrap().recording
    }

    fn is_playing(&self) -> bool {
        self.log.lock().unwrap().playing
    }
}

/// What the transport does for one attempt
pub enum Script {
    /// Fail to open the exchange
    Refuse(TransportError),
    /// Deliver these items, then end the response stream
    Respond(Vec<Result<AssistResponse, TransportError>>),
    /// Open the exchange and never answer
    Hang,
}

/// Transport that plays one [`Script`] per attempt and keeps every request
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Arc<Mutex<Vec<Vec<AssistRequest>>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> (Self, Arc<Mutex<Vec<Vec<AssistRequest>>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            scripts: Mutex::new(scripts.into()),
            requests: Arc::clone(&requests),
        };
        (transport, requests)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn assist(&self, requests: RequestStream) -> Result<ResponseStream, TransportError> {
        let sent: Vec<AssistRequest> = requests.collect().await;
        self.requests.lock().unwrap().push(sent);

        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Refuse(e)) => Err(e),
            Some(Script::Respond(items)) => Ok(stream::iter(items).boxed()),
            Some(Script::Hang) => Ok(stream::pending().boxed()),
            None => Err(TransportError::new(
                assist_client::TransportStatus::Internal,
                "no script left",
            )),
        }
    }
}

/// Dispatcher that records requests and hands back one slow action each
#[derive(Default)]
pub struct RecordingDispatcher {
    pub requests: Mutex<Vec<Value>>,
    pub completed: Arc<AtomicBool>,
}

impl DeviceActionDispatcher for RecordingDispatcher {
    fn dispatch(&self, request: &Value) -> assist_client::Result<Vec<ActionHandle>> {
        self.requests.lock().unwrap().push(request.clone());
        let completed = Arc::clone(&self.completed);
        Ok(vec![tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            completed.store(true, Ordering::SeqCst);
        })])
    }
}

/// Dispatcher whose actions never finish
#[derive(Default)]
pub struct StuckDispatcher {
    pub handles: Mutex<Vec<tokio::task::AbortHandle>>,
}

impl DeviceActionDispatcher for StuckDispatcher {
    fn dispatch(&self, _request: &Value) -> assist_client::Result<Vec<ActionHandle>> {
        let handle = tokio::spawn(std::future::pending::<()>());
        self.handles.lock().unwrap().push(handle.abort_handle());
        Ok(vec![handle])
    }
}

/// Microphone that keeps capturing 4-byte blocks every 10 ms until stopped
#[derive(Default)]
pub struct ContinuousSource {
    task: Option<JoinHandle<()>>,
}

impl AudioSource for ContinuousSource {
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> assist_client::Result<()> {
        self.task = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_millis(10));
            loop {
                ticks.tick().await;
                if tx.send(vec![0; 4]).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Speaker that keeps everything written to it
#[derive(Default)]
pub struct SharedSink {
    pub written: Arc<Mutex<Vec<u8>>>,
}

impl AudioSink for SharedSink {
    fn start(&mut self) -> assist_client::Result<()> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> assist_client::Result<()> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> assist_client::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Transport that drains requests in its own task and answers mid-stream
///
/// Once `answer_after` audio chunks have arrived it sends its responses and
/// closes the response side, but keeps draining requests until the caller
/// ends them.
pub struct LiveTransport {
    responses: Mutex<Option<Vec<AssistResponse>>>,
    answer_after: usize,
    pub chunks_sent: Arc<AtomicUsize>,
    pub requests_ended: Arc<AtomicBool>,
}

impl LiveTransport {
    pub fn new(answer_after: usize, responses: Vec<AssistResponse>) -> Self {
        Self {
            responses: Mutex::new(Some(responses)),
            answer_after,
            chunks_sent: Arc::default(),
            requests_ended: Arc::default(),
        }
    }

    /// Wait until the caller has ended its request stream
    pub async fn wait_for_requests_to_end(ended: &AtomicBool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !ended.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("request stream should end");
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn assist(&self, mut requests: RequestStream) -> Result<ResponseStream, TransportError> {
        let responses = self.responses.lock().unwrap().take().unwrap_or_default();
        let answer_after = self.answer_after;
        let chunks_sent = Arc::clone(&self.chunks_sent);
        let requests_ended = Arc::clone(&self.requests_ended);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut tx = Some(tx);
            while let Some(request) = requests.next().await {
                if matches!(request, AssistRequest::AudioIn(_)) {
                    let sent = chunks_sent.fetch_add(1, Ordering::SeqCst) + 1;
                    if sent >= answer_after
                        && let Some(tx) = tx.take()
                    {
                        for response in &responses {
                            let _ = tx.send(Ok(response.clone()));
                        }
                    }
                }
            }
            requests_ended.store(true, Ordering::SeqCst);
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Indicator that remembers every value it was set to
#[derive(Default)]
pub struct RecordingIndicator {
    pub values: Mutex<Vec<bool>>,
}

impl RecordingIndicator {
    pub fn last(&self) -> Option<bool> {
        self.values.lock().unwrap().last().copied()
    }
}

impl ListeningIndicator for RecordingIndicator {
    fn set(&self, on: bool) {
        self.values.lock().unwrap().push(on);
    }
}

/// Display that keeps every page it was given
#[derive(Default)]
pub struct RecordingDisplay {
    pub pages: Mutex<Vec<Vec<u8>>>,
}

impl DisplaySink for RecordingDisplay {
    fn display(&self, html: &[u8]) -> assist_client::Result<()> {
        self.pages.lock().unwrap().push(html.to_vec());
        Ok(())
    }
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        language_code: "en-US".into(),
        device: DeviceIdentity {
            id: "device-1".into(),
            model_id: "model-1".into(),
        },
        display: false,
        deadline: Duration::from_secs(185),
    }
}

pub fn end_of_utterance() -> AssistResponse {
    AssistResponse {
        event_type: Some(EventType::EndOfUtterance),
        ..AssistResponse::default()
    }
}

pub fn transcript(text: &str) -> AssistResponse {
    AssistResponse {
        speech_results: vec![SpeechRecognitionResult {
            transcript: text.into(),
            stability: 1.0,
        }],
        ..AssistResponse::default()
    }
}

pub fn audio(data: &[u8]) -> AssistResponse {
    AssistResponse {
        audio_out: Some(AudioOut {
            audio_data: data.to_vec(),
        }),
        ..AssistResponse::default()
    }
}

pub fn dialog(state: &[u8], mode: MicrophoneModeOut, volume: u8) -> AssistResponse {
    AssistResponse {
        dialog_state_out: Some(DialogStateOut {
            conversation_state: Some(ConversationState::new(state.to_vec())),
            microphone_mode: Some(mode),
            volume_percentage: volume,
            ..DialogStateOut::default()
        }),
        ..AssistResponse::default()
    }
}

pub fn microphone_mode(mode: MicrophoneModeOut) -> AssistResponse {
    AssistResponse {
        dialog_state_out: Some(DialogStateOut {
            microphone_mode: Some(mode),
            ..DialogStateOut::default()
        }),
        ..AssistResponse::default()
    }
}

pub fn device_action(json: &str) -> AssistResponse {
    AssistResponse {
        device_action: Some(DeviceAction {
            device_request_json: json.into(),
        }),
        ..AssistResponse::default()
    }
}

pub fn screen(html: &[u8]) -> AssistResponse {
    AssistResponse {
        screen_out: Some(ScreenOut {
            format: "HTML".into(),
            data: html.to_vec(),
        }),
        ..AssistResponse::default()
    }
}

/// Responses of a complete, closing turn
pub fn closing_turn(state: &[u8]) -> Script {
    Script::Respond(vec![
        Ok(end_of_utterance()),
        Ok(transcript("what time is it")),
        Ok(audio(&[1, 0, 2, 0])),
        Ok(dialog(state, MicrophoneModeOut::CloseMicrophone, 0)),
    ])
}

/// Responses of a complete turn that asks for a follow-on
pub fn follow_on_turn(state: &[u8]) -> Script {
    Script::Respond(vec![
        Ok(end_of_utterance()),
        Ok(audio(&[1, 0])),
        Ok(dialog(state, MicrophoneModeOut::DialogFollowOn, 0)),
    ])
}

/// The config message of one attempt's requests
pub fn config_of(requests: &[AssistRequest]) -> &assist_client::TurnRequestConfig {
    requests
        .first()
        .and_then(AssistRequest::config)
        .expect("first request carries the config")
}
