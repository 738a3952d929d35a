//! Voice-activity detection
//!
//! Energy based: RMS over a rolling window of the most recent samples,
//! with a silence hysteresis measured from the last loud capture so brief
//! dips inside a sentence do not split it.
//!
//! The window alone lags the microphone by its own length, so a tick only
//! counts as loud when the freshly captured samples are loud as well.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::VadConfig;

/// State of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance
    Speaking,
}

/// Transition reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Energy crossed the threshold; start recording
    SpeechStarted,
    /// Silence lasted long enough after real speech; finalize the segment
    SpeechEnded {
        /// Time from segment start to the last loud capture
        voiced: Duration,
    },
    /// Silence ended a burst too short to be speech; drop the recording
    SpeechDiscarded {
        /// Time from segment start to the last loud capture
        voiced: Duration,
    },
}

/// Detects the start and end of utterances from microphone energy
pub struct VoiceActivityDetector {
    threshold: f32,
    silence: Duration,
    min_speech: Duration,
    window: VecDeque<f32>,
    window_size: usize,
    state: VadState,
    speech_start: Option<Instant>,
    last_loud: Option<Instant>,
}

impl VoiceActivityDetector {
    /// Create a detector from config
    #[must_use]
    pub fn new(config: &VadConfig) -> Self {
        let window_size = config.window.max(1);
        tracing::debug!(
            threshold = config.threshold,
            silence_ms = config.silence_ms,
            min_speech_ms = config.min_speech_ms,
            window = window_size,
            "voice activity detector initialized"
        );

        Self {
            threshold: config.threshold,
            silence: config.silence(),
            min_speech: config.min_speech(),
            window: VecDeque::with_capacity(window_size),
            window_size,
            state: VadState::Idle,
            speech_start: None,
            last_loud: None,
        }
    }

    /// Add newly captured samples to the window and evaluate the tick
    ///
    /// An empty read is a quiet tick, so a stalled capture still lets the
    /// silence timer run out.
    pub fn process(&mut self, samples: &[f32], now: Instant) -> Option<VadEvent> {
        let skip = samples.len().saturating_sub(self.window_size);
        let fresh = &samples[skip..];
        for &sample in fresh {
            if self.window.len() == self.window_size {
                self.window.pop_front();
            }
            self.window.push_back(sample);
        }

        let (front, back) = self.window.as_slices();
        let window_rms = rms_of_parts(front, back);
        let fresh_rms = calculate_rms(fresh);
        self.evaluate(window_rms.min(fresh_rms), now)
    }

    /// Evaluate one RMS reading taken at `now`
    pub fn process_energy(&mut self, rms: f32, now: Instant) -> Option<VadEvent> {
        self.evaluate(rms, now)
    }

    fn evaluate(&mut self, rms: f32, now: Instant) -> Option<VadEvent> {
        if rms >= self.threshold {
            self.last_loud = Some(now);
            if self.state == VadState::Idle {
                self.state = VadState::Speaking;
                self.speech_start = Some(now);
                tracing::debug!(rms, "speech started");
                return Some(VadEvent::SpeechStarted);
            }
            return None;
        }

        if self.state != VadState::Speaking {
            return None;
        }

        let last_loud = self.last_loud.unwrap_or(now);
        if now.saturating_duration_since(last_loud) < self.silence {
            return None;
        }

        let start = self.speech_start.unwrap_or(last_loud);
        let voiced = last_loud.saturating_duration_since(start);
        self.state = VadState::Idle;
        self.speech_start = None;

        if voiced < self.min_speech {
            tracing::debug!(voiced_ms = voiced.as_millis(), "too short, discarding");
            Some(VadEvent::SpeechDiscarded { voiced })
        } else {
            tracing::debug!(voiced_ms = voiced.as_millis(), "speech ended");
            Some(VadEvent::SpeechEnded { voiced })
        }
    }

    /// Return to idle and forget the window
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.window.clear();
        self.speech_start = None;
        self.last_loud = None;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    /// Check if inside an utterance
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speaking
    }
}

/// Root-mean-square amplitude of samples in [-1, 1]
#[must_use]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    rms_of_parts(samples, &[])
}

#[allow(clippy::cast_precision_loss)]
fn rms_of_parts(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len() + b.len();
    if len == 0 {
        return 0.0;
    }
    let sum_squares: f32 = a.iter().chain(b).map(|s| s * s).sum();
    (sum_squares / len as f32).sqrt()
}
