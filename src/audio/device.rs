//! Microphone capture and speaker playback through the default audio host

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::{AudioSink, AudioSource, bytes_to_samples, f32_to_i16};
use crate::{Error, Result};

/// Poll interval while waiting for playback to drain
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Extra time allowed for the output device to drain past the queued audio
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captures LINEAR16 mono audio from the default input device
pub struct DeviceSource {
    config: StreamConfig,
    stream: Option<Stream>,
}

impl DeviceSource {
    /// Open the default input device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device is available
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            stream: None,
        })
    }
}

impl AudioSource for DeviceSource {
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let block: Vec<u8> = data
                        .iter()
                        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
                        .collect();
                    if tx.try_send(block).is_err() {
                        tracing::trace!("capture queue full or closed, dropping block");
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

/// Plays LINEAR16 mono audio on the default output device
pub struct DeviceSink {
    config: StreamConfig,
    sample_rate: u32,
    flush_size: usize,
    queue: Arc<Mutex<VecDeque<f32>>>,
    stream: Option<Stream>,
}

impl DeviceSink {
    /// Open the default output device at `sample_rate`
    ///
    /// `flush_size` bytes of silence are appended before draining so the
    /// device doesn't clip the tail of a response.
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device is available
    pub fn new(sample_rate: u32, flush_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && supports_rate(c))
            .or_else(|| {
                // Fallback: stereo, mono samples duplicated per frame
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| c.channels() == 2 && supports_rate(c))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            sample_rate,
            flush_size,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stream: None,
        })
    }

    fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl AudioSink for DeviceSink {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = usize::from(self.config.channels);
        let queue = Arc::clone(&self.queue);

        let stream = device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = queue.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| Error::Audio("playback queue poisoned".to_string()))?;
        queue.extend(
            bytes_to_samples(data)
                .into_iter()
                .map(|s| f32::from(s) / 32768.0),
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }

        self.write(&vec![0; self.flush_size])?;

        let queued = self.queued();
        let queued_ms = (queued as u64 * 1000) / u64::from(self.sample_rate.max(1));
        let timeout = Duration::from_millis(queued_ms) + DRAIN_GRACE;
        let start = Instant::now();

        while self.queued() > 0 {
            if start.elapsed() > timeout {
                tracing::warn!(remaining = self.queued(), "playback drain timed out");
                break;
            }
            std::thread::sleep(DRAIN_POLL);
        }

        tracing::debug!(samples = queued, "playback drained");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }
}
