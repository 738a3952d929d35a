//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// A live source of mono `f32` samples
pub trait SampleSource {
    /// Samples captured since the previous call
    ///
    /// # Errors
    ///
    /// Returns error if the device reported a failure since the last call
    fn take_samples(&mut self) -> Result<Vec<f32>>;

    /// Sample rate of the returned samples
    fn sample_rate(&self) -> u32;

    /// Release the underlying device
    fn release(&mut self);
}

#[derive(Default)]
struct Shared {
    samples: Vec<f32>,
    error: Option<String>,
}

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    shared: Arc<Mutex<Shared>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if no usable input device exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            shared: Arc::new(Mutex::new(Shared::default())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened (missing or denied)
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let data_shared = Arc::clone(&self.shared);
        let error_shared = Arc::clone(&self.shared);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut shared) = data_shared.lock() {
                        shared.samples.extend_from_slice(data);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if let Ok(mut shared) = error_shared.lock() {
                        shared.error = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.samples.clear();
        }
    }
}

impl SampleSource for AudioCapture {
    fn take_samples(&mut self) -> Result<Vec<f32>> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| Error::Audio("capture buffer poisoned".to_string()))?;

        if let Some(err) = shared.error.take() {
            shared.samples.clear();
            return Err(Error::Audio(err));
        }
        Ok(std::mem::take(&mut shared.samples))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn release(&mut self) {
        self.stop();
        self.clear_buffer();
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The default microphone, or why it could not be opened
///
/// An unavailable microphone reports its failure on every read so the
/// session can still start and show it instead of exiting.
pub enum Microphone {
    /// Capturing from the default input device
    Live(AudioCapture),
    /// Opening failed for the given reason
    Unavailable(String),
}

impl Microphone {
    /// Open and start the default input device
    #[must_use]
    pub fn open() -> Self {
        let opened = AudioCapture::new().and_then(|mut capture| {
            capture.start()?;
            Ok(capture)
        });

        match opened {
            Ok(capture) => Self::Live(capture),
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable, continuing without input");
                let reason = match e {
                    Error::Audio(msg) => msg,
                    other => other.to_string(),
                };
                Self::Unavailable(reason)
            }
        }
    }

    /// Whether input is actually being captured
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

impl SampleSource for Microphone {
    fn take_samples(&mut self) -> Result<Vec<f32>> {
        match self {
            Self::Live(capture) => capture.take_samples(),
            Self::Unavailable(reason) => {
                Err(Error::Audio(format!("microphone unavailable: {reason}")))
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn release(&mut self) {
        if let Self::Live(capture) = self {
            capture.release();
        }
    }
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
