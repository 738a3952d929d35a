//! Microphone loop: capture, voice-activity detection and segment hand-off

use std::sync::PoisonError;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::capture::SampleSource;
use super::pipeline::PipelineHandle;
use super::recorder::SegmentRecorder;
use super::vad::{VadEvent, VoiceActivityDetector};
use crate::config::VadConfig;
use crate::conversation::SharedConversation;

/// Drives the VAD once per frame and feeds finished segments to the pipeline
pub struct Listener<S> {
    source: S,
    detector: VoiceActivityDetector,
    recorder: SegmentRecorder,
    pipeline: PipelineHandle,
    conversation: SharedConversation,
    frame: Duration,
}

impl<S: SampleSource> Listener<S> {
    /// Create a listener reading from `source`
    #[must_use]
    pub fn new(
        source: S,
        config: &VadConfig,
        pipeline: PipelineHandle,
        conversation: SharedConversation,
    ) -> Self {
        let recorder = SegmentRecorder::new(source.sample_rate(), config.min_speech());
        Self {
            source,
            detector: VoiceActivityDetector::new(config),
            recorder,
            pipeline,
            conversation,
            frame: config.frame(),
        }
    }

    /// Tick every frame until `shutdown` fires, then release the microphone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.frame);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("listening");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = interval.tick() => {
                    self.tick(Instant::now());
                }
            }
        }

        self.stop(Instant::now());
    }

    /// Process the samples captured since the previous tick
    pub fn tick(&mut self, now: Instant) -> Option<VadEvent> {
        let samples = match self.source.take_samples() {
            Ok(samples) => samples,
            Err(e) => {
                tracing::debug!(error = %e, "capture failed, dropping segment");
                self.recorder.cancel();
                self.detector.reset();
                self.conversation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .set_banner(format!("녹음 오류: {e}"));
                return None;
            }
        };

        self.recorder.push(&samples);
        let event = self.detector.process(&samples, now);

        match event {
            Some(VadEvent::SpeechStarted) => {
                self.recorder.start(now);
                self.recorder.push(&samples);
            }
            Some(VadEvent::SpeechEnded { .. }) => self.finish_segment(now),
            Some(VadEvent::SpeechDiscarded { .. }) => self.recorder.cancel(),
            None => {}
        }

        event
    }

    fn finish_segment(&mut self, now: Instant) {
        match self.recorder.stop(now) {
            Ok(Some(segment)) => self.pipeline.enqueue(segment),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "failed to finalize segment");
                self.conversation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_error(&format!("세그먼트 처리 오류: {e}"));
            }
        }
    }

    /// Halt listening: force-stop any recording and release the source
    ///
    /// A segment cut off by the stop is never queued.
    pub fn stop(&mut self, now: Instant) {
        if self.recorder.is_recording() {
            if let Ok(samples) = self.source.take_samples() {
                self.recorder.push(&samples);
            }
            match self.recorder.stop(now) {
                Ok(Some(segment)) => {
                    tracing::debug!(bytes = segment.bytes.len(), "discarding segment cut off by stop");
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "discarding unfinished segment"),
            }
        }

        self.detector.reset();
        self.source.release();
        tracing::info!("stopped listening");
    }

    /// Check if an utterance is being recorded
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }
}
