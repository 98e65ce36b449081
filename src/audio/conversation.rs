//! Duplex conversation stream over a source/sink pair

use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;

use super::{
    AudioChunks, AudioSink, AudioSource, DEFAULT_VOLUME_PERCENT, DuplexAudioStream,
    bytes_to_samples, samples_to_bytes,
};
use crate::Result;

/// Captured blocks buffered between the device callback and the exchange
const CAPTURE_QUEUE_DEPTH: usize = 64;

/// Pairs an [`AudioSource`] and [`AudioSink`] into one [`DuplexAudioStream`]
pub struct ConversationStream {
    source: Box<dyn AudioSource>,
    sink: Box<dyn AudioSink>,
    sample_rate: u32,
    iter_size: usize,
    volume_percent: u8,
    recording: bool,
    playing: bool,
    pending: Option<mpsc::Receiver<Vec<u8>>>,
}

impl ConversationStream {
    /// Create a conversation stream
    ///
    /// `iter_size` is the byte size of each chunk handed to the exchange.
    #[must_use]
    pub fn new(
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
        sample_rate: u32,
        iter_size: usize,
    ) -> Self {
        Self {
            source,
            sink,
            sample_rate,
            iter_size: iter_size.max(2),
            volume_percent: DEFAULT_VOLUME_PERCENT,
            recording: false,
            playing: false,
            pending: None,
        }
    }

    /// Stop everything and leave the device idle
    pub fn close(&mut self) {
        self.stop_recording();
        self.stop_playback();
    }
}

impl DuplexAudioStream for ConversationStream {
    fn start_recording(&mut self) -> Result<()> {
        if self.recording {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE_DEPTH);
        self.source.start(tx)?;
        self.pending = Some(rx);
        self.recording = true;

        tracing::debug!("recording started");
        Ok(())
    }

    fn stop_recording(&mut self) {
        if !self.recording {
            return;
        }

        self.source.stop();
        self.pending = None;
        self.recording = false;

        tracing::debug!("recording stopped");
    }

    fn start_playback(&mut self) -> Result<()> {
        if self.playing {
            return Ok(());
        }

        self.sink.start()?;
        self.playing = true;

        tracing::debug!("playback started");
        Ok(())
    }

    fn stop_playback(&mut self) {
        if !self.playing {
            return;
        }

        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "failed to drain playback");
        }
        self.sink.stop();
        self.playing = false;

        tracing::debug!("playback stopped");
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let scaled = scale_volume(data, self.volume_percent);
        self.sink.write(&scaled)
    }

    fn produce(&mut self) -> AudioChunks {
        match self.pending.take() {
            Some(rx) => rechunk(rx, self.iter_size).boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn volume_percent(&self) -> u8 {
        self.volume_percent
    }

    fn set_volume_percent(&mut self, percent: u8) {
        self.volume_percent = percent.min(100);
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

impl Drop for ConversationStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Regroup arbitrarily sized captured blocks into `size`-byte chunks
///
/// The final chunk may be shorter. The stream ends once the sender side is
/// gone and everything buffered has been emitted.
fn rechunk(
    rx: mpsc::Receiver<Vec<u8>>,
    size: usize,
) -> impl futures::Stream<Item = Vec<u8>> + Send + 'static {
    stream::unfold((rx, Vec::new()), move |(mut rx, mut buf)| async move {
        loop {
            if buf.len() >= size {
                let rest = buf.split_off(size);
                return Some((buf, (rx, rest)));
            }

            if let Some(block) = rx.recv().await {
                buf.extend_from_slice(&block);
            } else {
                if buf.is_empty() {
                    return None;
                }
                let tail = std::mem::take(&mut buf);
                return Some((tail, (rx, buf)));
            }
        }
    })
}

/// Scale LINEAR16 samples for the given volume
///
/// Uses `2^(volume/100) - 1`, so 100% is unity gain and 0% is silence.
#[must_use]
pub fn scale_volume(data: &[u8], volume_percent: u8) -> Vec<u8> {
    let factor = 2f64.powf(f64::from(volume_percent.min(100)) / 100.0) - 1.0;

    #[allow(clippy::cast_possible_truncation)]
    let samples: Vec<i16> = bytes_to_samples(data)
        .into_iter()
        .map(|s| (f64::from(s) * factor).round().clamp(-32768.0, 32767.0) as i16)
        .collect();

    samples_to_bytes(&samples)
}
