//! WAV file input and output for offline single-turn runs

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AudioSink, AudioSource, bytes_to_samples, samples_to_bytes};
use crate::{Error, Result};

/// Reads a WAV (or headerless LINEAR16) file as if it were being captured
///
/// Blocks are released at real-time pace so the service sees the same
/// timing a microphone would produce.
pub struct WavFileSource {
    path: PathBuf,
    sample_rate: u32,
    block_size: usize,
    task: Option<JoinHandle<()>>,
}

impl WavFileSource {
    /// Create a file source
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32, block_size: usize) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            block_size: block_size.max(2),
            task: None,
        }
    }

    fn read_samples(&self) -> Result<Vec<u8>> {
        match hound::WavReader::open(&self.path) {
            Ok(reader) => {
                let spec = reader.spec();
                if spec.sample_rate != self.sample_rate
                    || spec.channels != 1
                    || spec.bits_per_sample != 16
                {
                    tracing::warn!(
                        path = %self.path.display(),
                        sample_rate = spec.sample_rate,
                        channels = spec.channels,
                        bits = spec.bits_per_sample,
                        expected_rate = self.sample_rate,
                        "input file format differs from configured audio format"
                    );
                }
                let samples = reader
                    .into_samples::<i16>()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::Audio(e.to_string()))?;
                Ok(samples_to_bytes(&samples))
            }
            Err(e) if self.path.is_file() => {
                tracing::debug!(path = %self.path.display(), error = %e, "not a WAV file, reading raw LINEAR16");
                Ok(std::fs::read(&self.path)?)
            }
            Err(e) => Err(Error::Audio(format!(
                "failed to open {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl AudioSource for WavFileSource {
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        self.stop();

        let data = self.read_samples()?;
        let block_size = self.block_size;
        let bytes_per_sec = u64::from(self.sample_rate) * 2;

        tracing::debug!(path = %self.path.display(), bytes = data.len(), "streaming input file");

        self.task = Some(tokio::spawn(async move {
            for block in data.chunks(block_size) {
                let micros = (block.len() as u64 * 1_000_000) / bytes_per_sec.max(1);
                tokio::time::sleep(Duration::from_micros(micros)).await;
                if tx.send(block.to_vec()).await.is_err() {
                    break;
                }
            }
            tracing::debug!("input file exhausted");
        }));

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Writes synthesized audio to a WAV file
pub struct WavFileSink {
    path: PathBuf,
    sample_rate: u32,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavFileSink {
    /// Create a file sink; the file is created on `start`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            writer: None,
        }
    }

    /// Output path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSink for WavFileSink {
    fn start(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| Error::Audio(format!("failed to create {}: {e}", self.path.display())))?;
        self.writer = Some(writer);

        tracing::debug!(path = %self.path.display(), "writing response audio");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Audio("output file not open".to_string()))?;
        for sample in bytes_to_samples(data) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| Error::Audio(e.to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.finalize()
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to finalize output file");
        }
    }
}
