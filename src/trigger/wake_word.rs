//! Wake phrase trigger
//!
//! Energy gating cuts the microphone signal into short speech segments; each
//! segment is transcribed and the trigger fires when a configured phrase
//! appears in the transcript.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use super::{TriggerFlag, TriggerHandle, TriggerSource, Transcriber};
use crate::audio::{AudioSource, DeviceSource, bytes_to_samples, samples_to_wav};
use crate::{Error, Result};

/// Normalized RMS above which a block counts as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Phrase used when none is configured
pub const DEFAULT_WAKE_PHRASE: &str = "ok google";

/// How often a paused listener checks whether it may resume
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Segmentation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Accumulating a speech segment
    Listening,
}

/// Splits audio into speech segments and matches transcripts against phrases
pub struct WakeWordDetector {
    phrases: Vec<String>,
    state: DetectorState,
    segment: Vec<i16>,
    silence: usize,
    min_speech: usize,
    end_silence: usize,
    max_segment: usize,
}

impl WakeWordDetector {
    /// Create a detector for `phrases` at `sample_rate`
    ///
    /// A segment needs 0.3 s of audio, ends after 0.5 s of silence and is cut
    /// at 3 s.
    #[must_use]
    pub fn new(phrases: Vec<String>, sample_rate: u32) -> Self {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        let rate = sample_rate as usize;

        tracing::debug!(phrases = ?phrases, sample_rate, "wake word detector initialized");

        Self {
            phrases,
            state: DetectorState::Idle,
            segment: Vec::new(),
            silence: 0,
            min_speech: rate * 3 / 10,
            end_silence: rate / 2,
            max_segment: rate * 3,
        }
    }

    /// Feed one block of samples
    ///
    /// Returns the finished segment once speech is followed by enough silence
    /// or the segment reaches its maximum length.
    pub fn process(&mut self, samples: &[i16]) -> Option<Vec<i16>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.segment.clear();
                    self.segment.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech detected");
                }
                None
            }
            DetectorState::Listening => {
                self.segment.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                let complete = self.silence > self.end_silence && self.segment.len() > self.min_speech;
                if complete || self.segment.len() >= self.max_segment {
                    tracing::debug!(samples = self.segment.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.segment);
                    self.reset();
                    return Some(segment);
                }

                if self.silence > self.end_silence * 2 {
                    tracing::trace!("segment too short, resetting");
                    self.reset();
                }
                None
            }
        }
    }

    /// First configured phrase contained in `transcript`
    #[must_use]
    pub fn matches(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();
        self.phrases
            .iter()
            .find(|p| normalized.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Drop any partial segment
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.segment.clear();
        self.silence = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Configured phrases, normalized
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

/// RMS energy of samples normalized to [-1.0, 1.0]
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Listens on the default microphone for a wake phrase
///
/// Runs on a dedicated thread with its own current-thread runtime since
/// capture streams cannot move between threads. Capture is released while a
/// conversation is active so the session has the microphone to itself.
pub struct WakeWordTrigger {
    phrases: Vec<String>,
    sample_rate: u32,
    transcriber: Arc<dyn Transcriber>,
}

impl WakeWordTrigger {
    /// Create a trigger for `phrases`
    #[must_use]
    pub fn new(phrases: Vec<String>, sample_rate: u32, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            phrases,
            sample_rate,
            transcriber,
        }
    }

    /// Feed one captured block; fires `flag` when a phrase is heard
    ///
    /// Returns whether the flag was fired.
    ///
    /// # Errors
    ///
    /// Returns error if a finished segment cannot be encoded
    pub async fn handle_block(
        &self,
        detector: &mut WakeWordDetector,
        block: &[u8],
        flag: &TriggerFlag,
    ) -> Result<bool> {
        let Some(segment) = detector.process(&bytes_to_samples(block)) else {
            return Ok(false);
        };

        let wav = samples_to_wav(&segment, self.sample_rate)?;
        let transcript = match self.transcriber.transcribe(&wav).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "could not transcribe segment");
                return Ok(false);
            }
        };

        if let Some(phrase) = detector.matches(&transcript) {
            tracing::info!(phrase, transcript = %transcript, "wake phrase heard");
            return Ok(flag.fire("wake word"));
        }

        tracing::debug!(transcript = %transcript, "no wake phrase");
        Ok(false)
    }

    #[allow(clippy::future_not_send)]
    async fn listen(self, flag: Arc<TriggerFlag>, stop: Arc<AtomicBool>) -> Result<()> {
        let mut detector = WakeWordDetector::new(self.phrases.clone(), self.sample_rate);
        let mut capture = DeviceSource::new(self.sample_rate)?;
        let mut blocks: Option<mpsc::Receiver<Vec<u8>>> = None;

        while !stop.load(Ordering::SeqCst) {
            if !flag.is_armed() || flag.is_pending() {
                if blocks.take().is_some() {
                    capture.stop();
                    detector.reset();
                    tracing::debug!("wake word listener paused");
                }
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }

            if blocks.is_none() {
                let (tx, rx) = mpsc::channel(64);
                capture.start(tx)?;
                blocks = Some(rx);
                tracing::debug!("wake word listener capturing");
            }
            let Some(rx) = blocks.as_mut() else {
                continue;
            };

            match tokio::time::timeout(IDLE_POLL, rx.recv()).await {
                Ok(Some(block)) => {
                    self.handle_block(&mut detector, &block, &flag).await?;
                }
                Ok(None) => {
                    capture.stop();
                    blocks = None;
                }
                Err(_) => {}
            }
        }

        capture.stop();
        Ok(())
    }
}

impl TriggerSource for WakeWordTrigger {
    fn name(&self) -> &'static str {
        "wake word"
    }

    fn spawn(self: Box<Self>, flag: Arc<TriggerFlag>) -> Result<TriggerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("wake-word".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to start wake word runtime");
                        return;
                    }
                };

                if let Err(e) = runtime.block_on(self.listen(flag, thread_stop)) {
                    tracing::error!(error = %e, "wake word listener stopped");
                }
            })
            .map_err(|e| Error::WakeWord(e.to_string()))?;

        Ok(TriggerHandle::thread("wake word", stop))
    }
}
