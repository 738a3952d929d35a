//! Segment recording between VAD start and stop

use std::time::{Duration, Instant};

use super::capture::samples_to_wav;
use crate::Result;

/// Media type of finalized segments
pub const SEGMENT_MEDIA_TYPE: &str = "audio/wav";

/// One finalized utterance, ready for transcription
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Encoded audio
    pub bytes: Vec<u8>,
    /// Media type of `bytes`
    pub media_type: &'static str,
    /// Wall-clock time between start and stop
    pub duration: Duration,
}

/// Records exactly one contiguous segment at a time
pub struct SegmentRecorder {
    sample_rate: u32,
    min_speech: Duration,
    samples: Vec<f32>,
    started_at: Option<Instant>,
}

impl SegmentRecorder {
    /// Create a recorder for samples at `sample_rate`
    #[must_use]
    pub const fn new(sample_rate: u32, min_speech: Duration) -> Self {
        Self {
            sample_rate,
            min_speech,
            samples: Vec::new(),
            started_at: None,
        }
    }

    /// Begin a new segment, dropping anything buffered
    pub fn start(&mut self, now: Instant) {
        self.samples.clear();
        self.started_at = Some(now);
        tracing::trace!("segment recording started");
    }

    /// Buffer captured samples; ignored when not recording
    pub fn push(&mut self, samples: &[f32]) {
        if self.started_at.is_some() {
            self.samples.extend_from_slice(samples);
        }
    }

    /// Finalize the segment
    ///
    /// Returns `None` when nothing was recorded or the segment is shorter
    /// than the minimum speech duration.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn stop(&mut self, now: Instant) -> Result<Option<AudioSegment>> {
        let Some(started_at) = self.started_at.take() else {
            return Ok(None);
        };
        let samples = std::mem::take(&mut self.samples);
        let duration = now.saturating_duration_since(started_at);

        if samples.is_empty() {
            tracing::debug!("segment empty, dropping");
            return Ok(None);
        }

        if duration < self.min_speech {
            tracing::debug!(duration_ms = duration.as_millis(), "segment too short, dropping");
            return Ok(None);
        }

        let bytes = samples_to_wav(&samples, self.sample_rate)?;
        tracing::debug!(
            samples = samples.len(),
            bytes = bytes.len(),
            duration_ms = duration.as_millis(),
            "segment finalized"
        );

        Ok(Some(AudioSegment {
            bytes,
            media_type: SEGMENT_MEDIA_TYPE,
            duration,
        }))
    }

    /// Abandon the current segment
    pub fn cancel(&mut self) {
        if self.started_at.take().is_some() {
            tracing::trace!("segment recording cancelled");
        }
        self.samples.clear();
    }

    /// Check if a segment is being recorded
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }
}
