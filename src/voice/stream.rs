//! Streaming playback of synthesized speech
//!
//! Chunks of 16-bit PCM are played as they arrive and also collected into a
//! standalone WAV asset for replay once the stream ends.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;

use super::tts::SpeechStream;
use crate::{Error, Result};

/// Bytes per PCM sample (16-bit mono)
pub const SAMPLE_WIDTH: usize = 2;

/// Delay added when playback has fallen behind the output clock
pub const CATCH_UP_DELAY: f64 = 0.02;

/// A finished, self-contained playable audio file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAsset {
    /// Encoded file contents
    pub bytes: Vec<u8>,
    /// Media type of `bytes`
    pub media_type: &'static str,
    /// Sample rate of the audio
    pub sample_rate: u32,
}

/// An open audio output context
pub trait OutputSink {
    /// Output clock in seconds since the context was opened
    fn current_time(&self) -> f64;

    /// Play `samples` starting at `start_at` on the output clock
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the buffer
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<()>;

    /// Release the context; nothing further is played
    fn close(&mut self);
}

/// Opens output contexts
pub trait OutputDevice {
    /// Open a mono output context at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output is available
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>>;
}

/// Realigns arbitrarily split PCM chunks on sample boundaries
#[derive(Debug, Default)]
pub struct PcmReassembler {
    carry: Vec<u8>,
    pcm: Vec<u8>,
}

impl PcmReassembler {
    /// Create an empty reassembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one chunk and return its sample-aligned bytes
    ///
    /// A trailing partial sample is held back and prepended to the next chunk.
    /// Returned bytes are also appended to the accumulation buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(chunk);

        let aligned = data.len() - data.len() % SAMPLE_WIDTH;
        self.carry = data.split_off(aligned);
        self.pcm.extend_from_slice(&data);
        data
    }

    /// Bytes currently held back
    #[must_use]
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    /// Bytes accumulated so far
    #[must_use]
    pub fn pcm_len(&self) -> usize {
        self.pcm.len()
    }

    /// Forget any held-back partial sample
    pub fn clear_carry(&mut self) {
        self.carry.clear();
    }

    /// Package everything accumulated into a WAV asset
    ///
    /// A dangling partial sample is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn finish(&mut self, sample_rate: u32) -> Result<AudioAsset> {
        if !self.carry.is_empty() {
            tracing::debug!(bytes = self.carry.len(), "dropping incomplete trailing sample");
            self.carry.clear();
        }
        let pcm = std::mem::take(&mut self.pcm);
        Ok(AudioAsset {
            bytes: pcm16_to_wav(&pcm, sample_rate)?,
            media_type: "audio/wav",
            sample_rate,
        })
    }
}

/// Convert little-endian 16-bit PCM to `f32` in [-1, 1)
#[must_use]
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(SAMPLE_WIDTH)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Wrap little-endian 16-bit mono PCM in a WAV container
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(44 + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for b in pcm.chunks_exact(SAMPLE_WIDTH) {
            writer.write_sample(i16::from_le_bytes([b[0], b[1]]))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Plays one synthesized reply at a time while collecting it
pub struct StreamingPlayer {
    device: Box<dyn OutputDevice>,
    sink: Option<Box<dyn OutputSink>>,
    reassembler: PcmReassembler,
    next_start: f64,
    chunk_timeout: Option<Duration>,
}

impl StreamingPlayer {
    /// Create a player that opens contexts on `device`
    #[must_use]
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            device,
            sink: None,
            reassembler: PcmReassembler::new(),
            next_start: 0.0,
            chunk_timeout: None,
        }
    }

    /// Fail the cycle if no chunk arrives within `timeout`
    #[must_use]
    pub const fn with_chunk_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Play `stream` as it arrives and return the complete asset
    ///
    /// Any previous cycle is stopped first. The output context stays open
    /// after the stream ends so scheduled audio can finish.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if `shutdown` fires mid-stream, or the
    /// stream/device error; the player is stopped in both cases.
    pub async fn play_and_collect(
        &mut self,
        stream: SpeechStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<AudioAsset> {
        if self.is_active() {
            tracing::debug!("stopping previous playback");
            self.stop();
        }

        let SpeechStream {
            sample_rate,
            mut chunks,
        } = stream;

        self.reassembler = PcmReassembler::new();
        let sink = self.device.open(sample_rate)?;
        self.next_start = sink.current_time();
        self.sink = Some(sink);

        let result = self.drive(&mut chunks, sample_rate, shutdown).await;
        if result.is_err() {
            self.stop();
        }
        result
    }

    async fn drive(
        &mut self,
        chunks: &mut BoxStream<'static, Result<Vec<u8>>>,
        sample_rate: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<AudioAsset> {
        let timeout = self.chunk_timeout;
        let mut chunk_count = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => None,
                chunk = next_chunk(chunks, timeout) => Some(chunk),
            };

            match next {
                None => return Err(Error::Cancelled),
                Some(Some(chunk)) => {
                    self.process_chunk(&chunk?, sample_rate)?;
                    chunk_count += 1;
                }
                Some(None) => break,
            }
        }

        let asset = self.reassembler.finish(sample_rate)?;
        tracing::debug!(
            chunks = chunk_count,
            bytes = asset.bytes.len(),
            sample_rate,
            "speech stream complete"
        );
        Ok(asset)
    }

    #[allow(clippy::cast_precision_loss)]
    fn process_chunk(&mut self, chunk: &[u8], sample_rate: u32) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };

        let aligned = self.reassembler.push(chunk);
        if aligned.is_empty() {
            return Ok(());
        }

        let samples = pcm16_to_f32(&aligned);
        let now = sink.current_time();
        if self.next_start < now {
            tracing::trace!(behind = now - self.next_start, "playback behind, catching up");
            self.next_start = now + CATCH_UP_DELAY;
        }

        let duration = samples.len() as f64 / f64::from(sample_rate);
        sink.schedule(samples, self.next_start)?;
        self.next_start += duration;
        Ok(())
    }

    /// Halt scheduling, drop carry-over and release the output context
    pub fn stop(&mut self) {
        self.reassembler.clear_carry();
        self.next_start = 0.0;
        if let Some(mut sink) = self.sink.take() {
            sink.close();
            tracing::debug!("playback stopped");
        }
    }

    /// Check if an output context is open
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.sink.is_some()
    }
}

impl Drop for StreamingPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn next_chunk(
    chunks: &mut BoxStream<'static, Result<Vec<u8>>>,
    timeout: Option<Duration>,
) -> Option<Result<Vec<u8>>> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, chunks.next()).await {
            Ok(chunk) => chunk,
            Err(_) => Some(Err(Error::Timeout {
                service: "speech stream",
                after: limit,
            })),
        },
        None => chunks.next().await,
    }
}
