//! Audio plumbing shared by recording and playback
//!
//! A [`DuplexAudioStream`] owns the single physical audio path. The session
//! drives it through recording and playback; the stream itself never decides
//! when to switch.

mod conversation;
mod device;
mod file;

use futures::stream::BoxStream;
use tokio::sync::mpsc;

pub use conversation::{ConversationStream, scale_volume};
pub use device::{DeviceSink, DeviceSource};
pub use file::{WavFileSink, WavFileSource};

use crate::Result;

/// Default capture/playback sample rate in hertz
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Default sample width in bytes (LINEAR16)
pub const DEFAULT_SAMPLE_WIDTH: usize = 2;

/// Default size of each chunk handed to the exchange
pub const DEFAULT_ITER_SIZE: usize = 3200;

/// Default size of each device read/write block
pub const DEFAULT_BLOCK_SIZE: usize = 6400;

/// Default amount of silence written when draining playback
pub const DEFAULT_FLUSH_SIZE: usize = 25600;

/// Default output volume
pub const DEFAULT_VOLUME_PERCENT: u8 = 50;

/// Lazily produced audio chunks for one recording session
pub type AudioChunks = BoxStream<'static, Vec<u8>>;

/// Bidirectional audio path used by a conversation
pub trait DuplexAudioStream {
    /// Start capturing; chunks become available through [`Self::produce`]
    ///
    /// # Errors
    ///
    /// Returns error if the capture device cannot be started
    fn start_recording(&mut self) -> Result<()>;

    /// Stop capturing; the stream returned by `produce` ends after draining
    fn stop_recording(&mut self);

    /// Open the output path
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be started
    fn start_playback(&mut self) -> Result<()>;

    /// Drain and close the output path
    fn stop_playback(&mut self);

    /// Queue synthesized audio for playback
    ///
    /// # Errors
    ///
    /// Returns error if the sink rejects the data
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Take the chunk sequence of the current recording session
    ///
    /// Returns an empty sequence when called before `start_recording` or a
    /// second time within the same recording session.
    fn produce(&mut self) -> AudioChunks;

    /// Sample rate in hertz
    fn sample_rate(&self) -> u32;

    /// Output volume, 0-100
    fn volume_percent(&self) -> u8;

    /// Set output volume, 0-100
    fn set_volume_percent(&mut self, percent: u8);

    /// Whether capture is running
    fn is_recording(&self) -> bool;

    /// Whether playback is running
    fn is_playing(&self) -> bool;
}

/// Producer of raw LINEAR16 blocks
pub trait AudioSource {
    /// Start delivering blocks into `tx`
    ///
    /// Delivery ends when [`Self::stop`] is called or the source runs out;
    /// either way the source must drop every clone of `tx`.
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be opened
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()>;

    /// Stop delivering blocks
    fn stop(&mut self);
}

/// Consumer of raw LINEAR16 blocks
pub trait AudioSink {
    /// Open the sink
    ///
    /// # Errors
    ///
    /// Returns error if the sink cannot be opened
    fn start(&mut self) -> Result<()>;

    /// Write one block
    ///
    /// # Errors
    ///
    /// Returns error if the block cannot be written
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Block until everything written so far has been played or persisted
    ///
    /// # Errors
    ///
    /// Returns error if draining fails
    fn flush(&mut self) -> Result<()>;

    /// Close the sink
    fn stop(&mut self);
}

/// Decode little-endian 16-bit samples
#[must_use]
pub fn bytes_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode 16-bit samples as little-endian bytes
#[must_use]
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert a float sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Encode 16-bit mono samples as WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| crate::Error::Audio(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| crate::Error::Audio(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| crate::Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
