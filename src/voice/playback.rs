//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::stream::{OutputDevice, OutputSink};
use crate::{Error, Result};

/// A buffer waiting for its start frame
struct Scheduled {
    start_frame: u64,
    samples: Vec<f32>,
}

/// Frames rendered so far and buffers still to play
#[derive(Default)]
struct Timeline {
    frames_rendered: u64,
    queue: VecDeque<Scheduled>,
}

impl Timeline {
    /// Sample for the next frame; silence where nothing is scheduled
    fn next_sample(&mut self) -> f32 {
        let pos = self.frames_rendered;
        self.frames_rendered += 1;

        while let Some(front) = self.queue.front() {
            if front.start_frame + front.samples.len() as u64 <= pos {
                self.queue.pop_front();
            } else {
                break;
            }
        }

        match self.queue.front() {
            #[allow(clippy::cast_possible_truncation)]
            Some(front) if front.start_frame <= pos => {
                front.samples[(pos - front.start_frame) as usize]
            }
            _ => 0.0,
        }
    }
}

/// Opens output contexts on the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutputDevice;

impl CpalOutputDevice {
    /// Find a mono (or, failing that, stereo) config at `sample_rate`
    fn find_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| {
                Error::Audio(format!("no output config supports {sample_rate} Hz"))
            })?;

        Ok(supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config())
    }
}

impl OutputDevice for CpalOutputDevice {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = Self::find_config(&device, sample_rate)?;
        let channels = usize::from(config.channels);
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let render = Arc::clone(&timeline);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut timeline) = render.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = timeline.next_sample();
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "output context opened"
        );

        Ok(Box::new(CpalSink {
            stream: Some(stream),
            timeline,
            sample_rate,
        }))
    }
}

/// Output context backed by a cpal stream
pub struct CpalSink {
    stream: Option<Stream>,
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
}

impl OutputSink for CpalSink {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        let frames = self.timeline.lock().map_or(0, |t| t.frames_rendered);
        frames as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Audio("output context closed".to_string()));
        }

        let start_frame = (start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| Error::Audio("playback timeline poisoned".to_string()))?;
        timeline.queue.push_back(Scheduled {
            start_frame,
            samples,
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            if let Ok(mut timeline) = self.timeline.lock() {
                timeline.queue.clear();
            }
            tracing::debug!("output context closed");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Plays complete sample buffers to the default output device
pub struct AudioPlayback {
    device: Box<dyn OutputDevice>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    #[must_use]
    pub fn new() -> Self {
        Self::with_device(Box::new(CpalOutputDevice))
    }

    /// Create a playback instance on a specific output device
    #[must_use]
    pub fn with_device(device: Box<dyn OutputDevice>) -> Self {
        Self { device }
    }

    /// Play mono samples and wait until they finish
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot be opened
    #[allow(clippy::cast_precision_loss)]
    pub async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let sample_count = samples.len();
        let duration = Duration::from_secs_f64(sample_count as f64 / f64::from(sample_rate));

        let mut sink = self.device.open(sample_rate)?;
        let start = sink.current_time();
        sink.schedule(samples, start)?;

        // Small margin so the tail is not cut off
        tokio::time::sleep(duration + Duration::from_millis(100)).await;

        sink.close();
        tracing::debug!(samples = sample_count, "playback complete");
        Ok(())
    }
}

impl Default for AudioPlayback {
    fn default() -> Self {
        Self::new()
    }
}
