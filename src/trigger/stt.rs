//! Speech-to-text used to confirm wake phrases

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Turns a WAV segment into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `wav`
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects or cannot be reached
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Hosted transcription backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram
    Deepgram,
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

impl SttProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }
}

/// Transcribes short segments through a hosted API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a transcriber for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(provider: SttProvider, api_key: SecretString, model: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!("{provider:?} API key required")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            provider,
        })
    }

    async fn transcribe_whisper(&self, wav: &[u8]) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("segment.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    async fn transcribe_deepgram(&self, wav: &[u8]) -> Result<String> {
        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        Ok(result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(provider = ?self.provider, bytes = wav.len(), "transcribing segment");

        let transcript = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await,
        }
        .inspect_err(|e| tracing::warn!(provider = ?self.provider, error = %e, "transcription failed"))?;

        tracing::debug!(transcript = %transcript, "segment transcribed");
        Ok(transcript)
    }
}
