//! Voice processing module
//!
//! Handles audio capture, voice-activity detection, the sequential
//! STT → classification → TTS pipeline and streamed playback.

mod capture;
mod classify;
mod listener;
mod pipeline;
mod playback;
mod recorder;
mod stream;
mod stt;
mod tts;
mod vad;

pub use capture::{AudioCapture, Microphone, SAMPLE_RATE, SampleSource, samples_to_wav};
pub use classify::{
    Classification, Classifier, FALLBACK_NEXT, FALLBACK_PREV, FALLBACK_UNCLEAR, Intent,
    IntentClassifier,
};
pub use listener::Listener;
pub use pipeline::{
    JobOutcome, JobQueue, Pipeline, PipelineHandle, PipelineJob, Services, Stage,
};
pub use playback::{AudioPlayback, CpalOutputDevice, CpalSink};
pub use recorder::{AudioSegment, SEGMENT_MEDIA_TYPE, SegmentRecorder};
pub use stream::{
    AudioAsset, CATCH_UP_DELAY, OutputDevice, OutputSink, PcmReassembler, SAMPLE_WIDTH,
    StreamingPlayer, pcm16_to_f32, pcm16_to_wav,
};
pub use stt::{SpeechToText, Transcriber};
pub use tts::{DEFAULT_TTS_SAMPLE_RATE, SpeechStream, Synthesizer, TextToSpeech};
pub use vad::{VadEvent, VadState, VoiceActivityDetector, calculate_rms};
