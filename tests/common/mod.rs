//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use cookmode_voice::voice::{
    AudioSegment, Classification, Classifier, Intent, OutputDevice, OutputSink, SAMPLE_RATE,
    SampleSource, Services, SpeechStream, Synthesizer, Transcriber,
};
use cookmode_voice::{Error, Recipe, RecipeStep, Result};

/// Generate sine wave audio samples
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
pub fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// A four-step recipe
pub fn test_recipe() -> Recipe {
    Recipe::new(
        "된장찌개",
        ["물을 끓인다", "된장을 푼다", "채소를 넣는다", "두부를 넣는다"]
            .iter()
            .map(|d| RecipeStep {
                no: 0,
                desc: (*d).to_string(),
            })
            .collect(),
    )
}

/// A segment tagged with `tag` as its only byte
pub fn tagged_segment(tag: u8) -> AudioSegment {
    AudioSegment {
        bytes: vec![tag],
        media_type: "audio/wav",
        duration: Duration::from_millis(900),
    }
}

// ---- capture ----

/// Samples per 16 ms frame at 16 kHz
pub const FRAME: usize = 256;

/// One frame of a 440 Hz tone well above the VAD threshold
pub fn loud_frame() -> Vec<f32> {
    (0..FRAME)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect()
}

/// One frame of silence
pub fn quiet_frame() -> Vec<f32> {
    vec![0.0; FRAME]
}

/// Sample source replaying scripted reads, then silence
#[derive(Default)]
pub struct ScriptedSource {
    pub reads: VecDeque<Result<Vec<f32>>>,
    pub released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(reads: Vec<Result<Vec<f32>>>) -> Self {
        Self {
            reads: reads.into(),
            released: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SampleSource for ScriptedSource {
    fn take_samples(&mut self) -> Result<Vec<f32>> {
        self.reads.pop_front().unwrap_or_else(|| Ok(quiet_frame()))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

// ---- services ----

/// Transcriber returning scripted results and tracking overlap
#[derive(Default)]
pub struct FakeTranscriber {
    pub results: Mutex<VecDeque<Result<String>>>,
    pub delay: Duration,
    pub calls: Mutex<Vec<u8>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(results: Vec<Result<String>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<u8> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(audio.first().copied().unwrap_or(0));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("계속".to_string()))
    }
}

/// Classifier returning a fixed result
pub struct FakeClassifier {
    pub intent: Intent,
    pub reply: String,
    pub fail: bool,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeClassifier {
    pub fn new(intent: Intent, reply: &str) -> Self {
        Self {
            intent,
            reply: reply.to_string(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Intent::None, "")
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, text: &str, current_step: &str) -> Result<Classification> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), current_step.to_string()));
        if self.fail {
            return Err(Error::Classify("HTTP 500 Internal Server Error: boom".to_string()));
        }
        Ok(Classification::new(self.intent.clone(), &self.reply))
    }
}

/// Synthesizer streaming fixed chunks
pub struct FakeSynthesizer {
    pub chunks: Vec<Vec<u8>>,
    pub sample_rate: u32,
    /// Yield an error after the chunks instead of ending
    pub fail_mid_stream: bool,
    /// Never finish after the chunks
    pub hang: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            sample_rate: 32000,
            fail_mid_stream: false,
            hang: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechStream> {
        self.calls.lock().unwrap().push(text.to_string());

        let chunks: Vec<Result<Vec<u8>>> = self.chunks.iter().cloned().map(Ok).collect();
        let head = futures::stream::iter(chunks);
        let chunks = if self.fail_mid_stream {
            head.chain(futures::stream::iter(vec![Err(Error::Tts(
                "connection reset".to_string(),
            ))]))
            .boxed()
        } else if self.hang {
            head.chain(futures::stream::pending()).boxed()
        } else {
            head.boxed()
        };

        Ok(SpeechStream {
            sample_rate: self.sample_rate,
            chunks,
        })
    }
}

/// Bundle fakes into pipeline services
pub fn services(
    transcriber: &Arc<FakeTranscriber>,
    classifier: &Arc<FakeClassifier>,
    synthesizer: &Arc<FakeSynthesizer>,
) -> Services {
    Services {
        transcriber: Arc::clone(transcriber) as Arc<dyn Transcriber>,
        classifier: Arc::clone(classifier) as Arc<dyn Classifier>,
        synthesizer: Arc::clone(synthesizer) as Arc<dyn Synthesizer>,
    }
}

// ---- output ----

/// Everything the fake output device saw
#[derive(Debug, Default)]
pub struct OutputLog {
    pub opened: Vec<u32>,
    /// (sample count, start time)
    pub scheduled: Vec<(usize, f64)>,
    pub samples: Vec<f32>,
    pub closed: usize,
    /// Output clock reported to the player
    pub clock: f64,
    /// Clock advance after each scheduled buffer
    pub clock_step: f64,
}

/// Output device recording into a shared log
#[derive(Clone, Default)]
pub struct FakeOutput {
    pub log: Arc<Mutex<OutputLog>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clock(&self, t: f64) {
        self.log.lock().unwrap().clock = t;
    }

    /// Make the clock jump by `step` each time a buffer is scheduled
    pub fn advance_per_buffer(&self, step: f64) {
        self.log.lock().unwrap().clock_step = step;
    }

    pub fn open_count(&self) -> usize {
        self.log.lock().unwrap().opened.len()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    pub fn scheduled(&self) -> Vec<(usize, f64)> {
        self.log.lock().unwrap().scheduled.clone()
    }

    pub fn samples(&self) -> Vec<f32> {
        self.log.lock().unwrap().samples.clone()
    }
}

impl OutputDevice for FakeOutput {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>> {
        self.log.lock().unwrap().opened.push(sample_rate);
        Ok(Box::new(FakeSink {
            log: Arc::clone(&self.log),
            open: true,
        }))
    }
}

struct FakeSink {
    log: Arc<Mutex<OutputLog>>,
    open: bool,
}

impl OutputSink for FakeSink {
    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().clock
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.scheduled.push((samples.len(), start_at));
        log.samples.extend(samples);
        log.clock += log.clock_step;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.lock().unwrap().closed += 1;
        }
    }
}
