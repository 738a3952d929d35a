//! Pipeline and session integration tests
//!
//! Services and audio devices are replaced with in-process fakes

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::LocalSet;

use cookmode_voice::voice::{
    FALLBACK_NEXT, Intent, JobOutcome, OutputDevice, OutputSink, Pipeline, PipelineHandle,
    PipelineJob, Services, SpeechStream, Stage, StreamingPlayer, Synthesizer,
};
use cookmode_voice::{
    Config, Conversation, CookingSession, Error, MessageStatus, Result, Role, SharedConversation,
};

mod common;
use common::{
    FakeClassifier, FakeOutput, FakeSynthesizer, FakeTranscriber, ScriptedSource, loud_frame,
    services, tagged_segment, test_recipe,
};

const fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

struct Harness {
    pipeline: Pipeline,
    conversation: SharedConversation,
    output: FakeOutput,
    shutdown: watch::Sender<bool>,
}

fn harness(services: Services, start_step: usize) -> Harness {
    let conversation = Conversation::shared();
    let output = FakeOutput::new();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let pipeline = Pipeline::new(
        services,
        Arc::new(test_recipe()),
        start_step,
        Arc::clone(&conversation),
        StreamingPlayer::new(Box::new(output.clone())),
        shutdown_rx,
    );

    Harness {
        pipeline,
        conversation,
        output,
        shutdown,
    }
}

fn job(tag: u8) -> PipelineJob {
    PipelineJob {
        id: u64::from(tag),
        segment: tagged_segment(tag),
    }
}

fn reply_audio() -> Vec<Vec<u8>> {
    vec![vec![0u8; 640], vec![0u8; 641], vec![0u8; 639]]
}

/// Wait until the worker has nothing running or queued
async fn wait_idle(handle: &PipelineHandle) {
    for _ in 0..500 {
        if !handle.is_busy() && handle.pending() == 0 {
            return;
        }
        tokio::time::sleep(ms(10)).await;
    }
    panic!("pipeline never went idle");
}

/// Records the reply's status when synthesis starts and when output opens
struct StatusRecorder {
    conversation: SharedConversation,
    seen: Arc<Mutex<Vec<MessageStatus>>>,
}

impl StatusRecorder {
    fn record(&self) {
        let conversation = self.conversation.lock().unwrap();
        if let Some(last) = conversation.messages().last() {
            self.seen.lock().unwrap().push(last.status);
        }
    }
}

struct RecordingSynthesizer {
    status: Arc<StatusRecorder>,
    inner: FakeSynthesizer,
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechStream> {
        self.status.record();
        self.inner.synthesize(text).await
    }
}

struct RecordingOutput {
    status: Arc<StatusRecorder>,
    inner: FakeOutput,
}

impl OutputDevice for RecordingOutput {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>> {
        self.status.record();
        self.inner.open(sample_rate)
    }
}

#[tokio::test]
async fn test_next_step_command_end_to_end() {
    let conversation = Conversation::shared();
    let status = Arc::new(StatusRecorder {
        conversation: Arc::clone(&conversation),
        seen: Arc::new(Mutex::new(Vec::new())),
    });

    let transcriber = Arc::new(FakeTranscriber::new(vec![Ok(
        "  다음 단계로 넘어가줘 ".to_string(),
    )]));
    let classifier = Arc::new(FakeClassifier::new(Intent::NextStep, ""));
    let synthesizer = Arc::new(RecordingSynthesizer {
        status: Arc::clone(&status),
        inner: FakeSynthesizer::new(reply_audio()),
    });
    let output = FakeOutput::new();

    let services = Services {
        transcriber: transcriber.clone(),
        classifier: classifier.clone(),
        synthesizer,
    };
    let (_shutdown, shutdown_rx) = watch::channel(false);
    let mut pipeline = Pipeline::new(
        services,
        Arc::new(test_recipe()),
        2,
        Arc::clone(&conversation),
        StreamingPlayer::new(Box::new(RecordingOutput {
            status: Arc::clone(&status),
            inner: output.clone(),
        })),
        shutdown_rx,
    );
    let mut cursor = pipeline.cursor_updates();

    let outcome = pipeline.process(job(1)).await;

    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(pipeline.step(), 3);
    assert!(cursor.has_changed().unwrap());
    assert_eq!(*cursor.borrow_and_update(), 3);

    // Classified against the step the user was on
    assert_eq!(
        classifier.calls(),
        vec![("다음 단계로 넘어가줘".to_string(), "채소를 넣는다".to_string())]
    );

    assert_eq!(
        *status.seen.lock().unwrap(),
        vec![MessageStatus::Generating, MessageStatus::Streaming]
    );

    let conversation = conversation.lock().unwrap();
    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);

    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text, "다음 단계로 넘어가줘");

    let reply = &messages[1];
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.text, FALLBACK_NEXT);
    assert_eq!(reply.intent, Some(Intent::NextStep));
    assert_eq!(reply.status, MessageStatus::Done);

    // 1920 bytes across three chunks, all of it played and kept
    let audio = reply.audio.as_ref().unwrap();
    assert_eq!(audio.media_type, "audio/wav");
    assert_eq!(audio.bytes.len(), 44 + 1920);
    assert_eq!(output.samples().len(), 960);
}

#[tokio::test]
async fn test_reply_text_is_spoken() {
    let transcriber = Arc::new(FakeTranscriber::new(vec![Ok("이전 단계".to_string())]));
    let classifier = Arc::new(FakeClassifier::new(Intent::PrevStep, "된장을 풀어주세요."));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let mut h = harness(services(&transcriber, &classifier, &synthesizer), 2);

    assert_eq!(h.pipeline.process(job(1)).await, JobOutcome::Completed);
    assert_eq!(h.pipeline.step(), 1);
    assert_eq!(synthesizer.calls(), vec!["된장을 풀어주세요.".to_string()]);
    assert_eq!(h.output.open_count(), 1);
}

#[tokio::test]
async fn test_empty_transcript_is_ignored() {
    let transcriber = Arc::new(FakeTranscriber::new(vec![
        Ok(String::new()),
        Ok("  \n\t ".to_string()),
    ]));
    let classifier = Arc::new(FakeClassifier::new(Intent::NextStep, ""));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let mut h = harness(services(&transcriber, &classifier, &synthesizer), 0);

    assert_eq!(h.pipeline.process(job(1)).await, JobOutcome::Silent);
    assert_eq!(h.pipeline.process(job(2)).await, JobOutcome::Silent);

    assert!(h.conversation.lock().unwrap().messages().is_empty());
    assert!(classifier.calls().is_empty());
    assert!(synthesizer.calls().is_empty());
    assert_eq!(h.pipeline.step(), 0);
}

#[tokio::test]
async fn test_step_is_clamped_at_both_ends() {
    let transcriber = Arc::new(FakeTranscriber::new(Vec::new()));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));

    let next = Arc::new(FakeClassifier::new(Intent::NextStep, ""));
    let mut at_last = harness(services(&transcriber, &next, &synthesizer), 3);
    let cursor = at_last.pipeline.cursor_updates();
    assert_eq!(at_last.pipeline.process(job(1)).await, JobOutcome::Completed);
    assert_eq!(at_last.pipeline.step(), 3);
    assert!(!cursor.has_changed().unwrap());

    let prev = Arc::new(FakeClassifier::new(Intent::PrevStep, ""));
    let mut at_first = harness(services(&transcriber, &prev, &synthesizer), 0);
    assert_eq!(at_first.pipeline.process(job(2)).await, JobOutcome::Completed);
    assert_eq!(at_first.pipeline.step(), 0);

    // The reply is still spoken when the step does not move
    assert_eq!(synthesizer.calls().len(), 2);
}

#[tokio::test]
async fn test_start_step_beyond_recipe_is_clamped() {
    let transcriber = Arc::new(FakeTranscriber::new(Vec::new()));
    let classifier = Arc::new(FakeClassifier::new(Intent::None, ""));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let h = harness(services(&transcriber, &classifier, &synthesizer), 42);

    assert_eq!(h.pipeline.step(), 3);
}

#[tokio::test]
async fn test_unknown_intent_keeps_step() {
    let transcriber = Arc::new(FakeTranscriber::new(vec![Ok("소금 얼마나 넣어?".to_string())]));
    let classifier = Arc::new(FakeClassifier::new(
        Intent::from_tag("ask_amount"),
        "소금은 한 꼬집이면 충분해요.",
    ));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let mut h = harness(services(&transcriber, &classifier, &synthesizer), 1);

    assert_eq!(h.pipeline.process(job(1)).await, JobOutcome::Completed);
    assert_eq!(h.pipeline.step(), 1);

    let conversation = h.conversation.lock().unwrap();
    assert_eq!(
        conversation.messages()[1].intent,
        Some(Intent::Other("ask_amount".to_string()))
    );
}

#[tokio::test]
async fn test_segments_processed_in_order_one_at_a_time() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let transcriber = Arc::new(
                FakeTranscriber::new(vec![
                    Ok("하나".to_string()),
                    Ok("둘".to_string()),
                    Ok("셋".to_string()),
                ])
                .with_delay(ms(40)),
            );
            let classifier = Arc::new(FakeClassifier::new(Intent::None, "네."));
            let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
            let h = harness(services(&transcriber, &classifier, &synthesizer), 0);

            let handle = h.pipeline.handle();
            let worker = tokio::task::spawn_local(h.pipeline.run());

            handle.enqueue(tagged_segment(1));
            tokio::time::sleep(ms(10)).await;
            assert!(handle.is_busy());

            // Arrive while the first job is still transcribing
            handle.enqueue(tagged_segment(2));
            handle.enqueue(tagged_segment(3));
            assert_eq!(handle.pending(), 2);

            wait_idle(&handle).await;
            h.shutdown.send_replace(true);
            worker.await.unwrap();

            assert_eq!(transcriber.calls(), vec![1, 2, 3]);
            assert_eq!(transcriber.max_active.load(Ordering::SeqCst), 1);

            let texts: Vec<String> = classifier.calls().into_iter().map(|(t, _)| t).collect();
            assert_eq!(texts, vec!["하나", "둘", "셋"]);

            let conversation = h.conversation.lock().unwrap();
            let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
            assert_eq!(
                roles,
                vec![
                    Role::User,
                    Role::Assistant,
                    Role::User,
                    Role::Assistant,
                    Role::User,
                    Role::Assistant
                ]
            );

            // Each reply replaced the previous output context
            assert_eq!(h.output.open_count(), 3);
            assert_eq!(h.output.closed(), 3);
        })
        .await;
}

#[tokio::test]
async fn test_failed_stage_does_not_block_queue() {
    let transcriber = Arc::new(FakeTranscriber::new(vec![
        Ok("첫 번째".to_string()),
        Ok("두 번째".to_string()),
    ]));
    let classifier = Arc::new(FakeClassifier::failing());
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let mut h = harness(services(&transcriber, &classifier, &synthesizer), 0);

    let handle = h.pipeline.handle();
    handle.enqueue(tagged_segment(1));
    handle.enqueue(tagged_segment(2));
    h.pipeline.drain().await;

    assert!(!handle.is_busy());
    assert_eq!(handle.pending(), 0);
    assert_eq!(transcriber.calls(), vec![1, 2]);

    let conversation = h.conversation.lock().unwrap();
    let messages = conversation.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].text, "첫 번째");
    assert_eq!(messages[1].status, MessageStatus::Error);
    assert!(messages[1].text.starts_with("⚠️ 오류:"));
    assert!(messages[1].text.contains("boom"));
    assert_eq!(messages[2].text, "두 번째");
    assert_eq!(messages[3].status, MessageStatus::Error);
    assert!(synthesizer.calls().is_empty());
}

#[tokio::test]
async fn test_transcription_failure_is_reported() {
    let transcriber = Arc::new(FakeTranscriber::new(vec![Err(Error::Stt(
        "HTTP 503 Service Unavailable".to_string(),
    ))]));
    let classifier = Arc::new(FakeClassifier::new(Intent::NextStep, ""));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let mut h = harness(services(&transcriber, &classifier, &synthesizer), 0);

    assert_eq!(
        h.pipeline.process(job(1)).await,
        JobOutcome::Failed(Stage::Transcribe)
    );

    let conversation = h.conversation.lock().unwrap();
    let messages = conversation.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::Assistant);
    assert!(messages[0].text.contains("503"));
    assert!(classifier.calls().is_empty());
}

#[tokio::test]
async fn test_synthesis_failure_marks_reply() {
    let transcriber = Arc::new(FakeTranscriber::new(vec![Ok("다음".to_string())]));
    let classifier = Arc::new(FakeClassifier::new(Intent::NextStep, "다음 단계예요."));
    let mut failing = FakeSynthesizer::new(reply_audio());
    failing.fail_mid_stream = true;
    let synthesizer = Arc::new(failing);
    let mut h = harness(services(&transcriber, &classifier, &synthesizer), 0);

    assert_eq!(
        h.pipeline.process(job(1)).await,
        JobOutcome::Failed(Stage::Synthesize)
    );
    // Navigation already happened before synthesis
    assert_eq!(h.pipeline.step(), 1);
    assert_eq!(h.output.closed(), 1);

    let conversation = h.conversation.lock().unwrap();
    let messages = conversation.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].text, "다음 단계예요.");
    assert_eq!(messages[1].status, MessageStatus::Error);
    assert!(messages[1].audio.is_none());
    assert!(messages[2].text.contains("connection reset"));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let transcriber = Arc::new(
        FakeTranscriber::new(vec![Ok("늦은 답".to_string())]).with_delay(ms(500)),
    );
    let classifier = Arc::new(FakeClassifier::new(Intent::NextStep, ""));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let h = harness(services(&transcriber, &classifier, &synthesizer), 0);
    let mut pipeline = h.pipeline.with_timeout(Some(ms(20)));

    assert_eq!(
        pipeline.process(job(1)).await,
        JobOutcome::Failed(Stage::Transcribe)
    );

    let conversation = h.conversation.lock().unwrap();
    assert!(conversation.messages()[0].text.contains("timed out"));
}

#[tokio::test]
async fn test_shutdown_abandons_job_quietly() {
    let transcriber = Arc::new(FakeTranscriber::new(vec![Ok("다음".to_string())]));
    let classifier = Arc::new(FakeClassifier::new(Intent::NextStep, ""));
    let mut hanging = FakeSynthesizer::new(reply_audio());
    hanging.hang = true;
    let synthesizer = Arc::new(hanging);
    let mut h = harness(services(&transcriber, &classifier, &synthesizer), 0);

    let shutdown = &h.shutdown;
    let (outcome, ()) = tokio::join!(h.pipeline.process(job(1)), async move {
        tokio::time::sleep(ms(30)).await;
        shutdown.send_replace(true);
    });

    assert_eq!(outcome, JobOutcome::Abandoned);
    assert_eq!(h.output.closed(), 1);

    let conversation = h.conversation.lock().unwrap();
    assert!(
        conversation
            .messages()
            .iter()
            .all(|m| m.status != MessageStatus::Error)
    );
    assert!(conversation.messages().iter().all(|m| m.audio.is_none()));
}

// ---- session ----

#[tokio::test]
async fn test_session_runs_one_command_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();

    // ~640 ms of speech, then silence
    let source = ScriptedSource::new((0..40).map(|_| Ok(loud_frame())).collect());
    let released = source.released.clone();

    let transcriber = Arc::new(FakeTranscriber::new(vec![Ok("다음 단계".to_string())]));
    let classifier = Arc::new(FakeClassifier::new(Intent::NextStep, ""));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));
    let output = FakeOutput::new();

    let session = CookingSession::new(
        Config::default(),
        test_recipe(),
        source,
        services(&transcriber, &classifier, &synthesizer),
        Box::new(output.clone()),
    )
    .save_replies_to(dir.path());
    let conversation = session.conversation();
    let watched = Arc::clone(&conversation);

    let summary = session
        .run_until(async move {
            for _ in 0..250 {
                let done = watched
                    .lock()
                    .unwrap()
                    .messages()
                    .iter()
                    .any(|m| m.audio.is_some());
                if done {
                    break;
                }
                tokio::time::sleep(ms(20)).await;
            }
        })
        .await
        .unwrap();

    assert_eq!(summary.final_step, 1);
    assert_eq!(summary.utterances, 1);
    assert_eq!(summary.replies, 1);
    assert_eq!(summary.saved, vec![dir.path().join("reply-01.wav")]);
    assert!(dir.path().join("reply-01.wav").exists());

    assert!(released.load(Ordering::SeqCst));
    assert_eq!(output.closed(), 1);
    assert!(conversation.lock().unwrap().messages().is_empty());
}

#[tokio::test]
async fn test_session_stopped_before_speech() {
    let source = ScriptedSource::default();
    let released = source.released.clone();

    let transcriber = Arc::new(FakeTranscriber::new(Vec::new()));
    let classifier = Arc::new(FakeClassifier::new(Intent::None, ""));
    let synthesizer = Arc::new(FakeSynthesizer::new(reply_audio()));

    let summary = CookingSession::new(
        Config::default(),
        test_recipe(),
        source,
        services(&transcriber, &classifier, &synthesizer),
        Box::new(FakeOutput::new()),
    )
    .start_at(2)
    .run_until(async {})
    .await
    .unwrap();

    assert_eq!(summary.final_step, 2);
    assert_eq!(summary.utterances, 0);
    assert!(summary.saved.is_empty());
    assert!(released.load(Ordering::SeqCst));
    assert!(transcriber.calls().is_empty());
}
