//! Sequential utterance processing
//!
//! Segments are queued FIFO and processed one at a time:
//! transcription → classification → step navigation → streamed synthesis.
//! A failing job is reported in the conversation and never blocks the queue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};

use super::classify::Classifier;
use super::recorder::AudioSegment;
use super::stream::StreamingPlayer;
use super::stt::Transcriber;
use super::tts::Synthesizer;
use crate::conversation::{Conversation, MessageStatus, SharedConversation};
use crate::recipe::{Recipe, StepCursor};
use crate::{Error, Result};

/// One segment waiting to be processed
#[derive(Debug)]
pub struct PipelineJob {
    /// Sequence number in enqueue order
    pub id: u64,
    /// Audio to process
    pub segment: AudioSegment,
}

/// FIFO of jobs with a single-flight guard
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<PipelineJob>,
    running: bool,
    next_id: u64,
}

impl JobQueue {
    /// Append a segment, returning its job id
    pub fn enqueue(&mut self, segment: AudioSegment) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push_back(PipelineJob { id, segment });
        id
    }

    /// Take the oldest job unless one is already running
    fn begin_next(&mut self) -> Option<PipelineJob> {
        if self.running {
            return None;
        }
        let job = self.jobs.pop_front()?;
        self.running = true;
        Some(job)
    }

    /// Mark the running job as finished
    fn finish(&mut self) {
        self.running = false;
    }

    /// Check if a job is in flight
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Jobs waiting behind the running one
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

/// Cloneable handle for feeding the pipeline
#[derive(Clone, Default)]
pub struct PipelineHandle {
    queue: Arc<Mutex<JobQueue>>,
    notify: Arc<Notify>,
}

impl PipelineHandle {
    /// Queue a segment and wake the worker
    pub fn enqueue(&self, segment: AudioSegment) {
        let bytes = segment.bytes.len();
        let (id, pending) = {
            let mut queue = self.lock();
            let id = queue.enqueue(segment);
            (id, queue.pending())
        };
        tracing::debug!(job = id, bytes, pending, "segment queued");
        self.notify.notify_one();
    }

    /// Check if a job is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock().is_running()
    }

    /// Jobs waiting to start
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending()
    }

    fn begin_next(&self) -> Option<PipelineJob> {
        self.lock().begin_next()
    }

    fn finish(&self) {
        self.lock().finish();
    }

    fn lock(&self) -> MutexGuard<'_, JobQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The external services a job calls
#[derive(Clone)]
pub struct Services {
    /// Speech-to-text
    pub transcriber: Arc<dyn Transcriber>,
    /// Intent classification
    pub classifier: Arc<dyn Classifier>,
    /// Speech synthesis
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Reply played and attached
    Completed,
    /// Nothing recognisable was said
    Silent,
    /// A stage failed; the failure is shown in the conversation
    Failed(Stage),
    /// The session shut down before the job finished
    Abandoned,
}

/// Processing stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Speech-to-text
    Transcribe,
    /// Intent classification
    Classify,
    /// Speech synthesis and playback
    Synthesize,
}

/// Single worker draining the job queue
pub struct Pipeline {
    services: Services,
    recipe: Arc<Recipe>,
    cursor: StepCursor,
    cursor_tx: watch::Sender<usize>,
    conversation: SharedConversation,
    player: StreamingPlayer,
    timeout: Option<Duration>,
    handle: PipelineHandle,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    /// Create a worker positioned at `start_step` of `recipe`
    #[must_use]
    pub fn new(
        services: Services,
        recipe: Arc<Recipe>,
        start_step: usize,
        conversation: SharedConversation,
        player: StreamingPlayer,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let cursor = StepCursor::new(start_step, recipe.steps.len());
        let (cursor_tx, _) = watch::channel(cursor.index());

        Self {
            services,
            recipe,
            cursor,
            cursor_tx,
            conversation,
            player,
            timeout: None,
            handle: PipelineHandle::default(),
            shutdown,
        }
    }

    /// Bound every service call by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self.player = self.player.with_chunk_timeout(timeout);
        self
    }

    /// Handle for enqueueing segments
    #[must_use]
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Current step index, updated whenever an intent moves it
    #[must_use]
    pub fn cursor_updates(&self) -> watch::Receiver<usize> {
        self.cursor_tx.subscribe()
    }

    /// Current step index
    #[must_use]
    pub const fn step(&self) -> usize {
        self.cursor.index()
    }

    /// Process queued jobs until shutdown
    pub async fn run(mut self) {
        tracing::debug!("pipeline worker started");
        loop {
            self.drain().await;
            if self.is_shut_down() {
                break;
            }

            let notify = Arc::clone(&self.handle.notify);
            tokio::select! {
                () = notify.notified() => {}
                _ = self.shutdown.wait_for(|stop| *stop) => break,
            }
        }

        self.player.stop();
        tracing::debug!("pipeline worker stopped");
    }

    /// Run queued jobs one after another until the queue is empty
    pub async fn drain(&mut self) {
        while let Some(job) = self.handle.begin_next() {
            let id = job.id;
            let outcome = self.process(job).await;
            self.handle.finish();
            tracing::debug!(job = id, ?outcome, "job finished");

            if self.is_shut_down() {
                break;
            }
        }
    }

    /// Run one job through every stage
    pub async fn process(&mut self, job: PipelineJob) -> JobOutcome {
        let timeout = self.timeout;

        // 1. Transcribe
        let transcriber = Arc::clone(&self.services.transcriber);
        let transcript = call(
            timeout,
            "transcription",
            transcriber.transcribe(&job.segment.bytes),
        )
        .await;
        drop(job);

        let text = match transcript {
            Ok(text) => text.trim().to_string(),
            Err(e) => return self.fail(Stage::Transcribe, &e, None),
        };
        if self.is_shut_down() {
            return JobOutcome::Abandoned;
        }
        if text.is_empty() {
            tracing::debug!("empty transcript, ignoring");
            return JobOutcome::Silent;
        }
        self.conversation().push_user(&text);

        // 2. Classify against the current step
        let classifier = Arc::clone(&self.services.classifier);
        let step_desc = self.recipe.step_desc(self.cursor.index()).to_string();
        let classification = match call(
            timeout,
            "classification",
            classifier.classify(&text, &step_desc),
        )
        .await
        {
            Ok(c) => c,
            Err(e) => return self.fail(Stage::Classify, &e, None),
        };
        if self.is_shut_down() {
            return JobOutcome::Abandoned;
        }

        // 3. Navigate
        if self.cursor.apply(&classification.intent) {
            self.cursor_tx.send_replace(self.cursor.index());
        }

        // 4. Synthesize and play
        let reply_id = self
            .conversation()
            .push_reply(&classification.reply, classification.intent.clone());

        let synthesizer = Arc::clone(&self.services.synthesizer);
        let stream = match call(
            timeout,
            "synthesis",
            synthesizer.synthesize(&classification.reply),
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => return self.fail(Stage::Synthesize, &e, Some(reply_id)),
        };
        if self.is_shut_down() {
            return JobOutcome::Abandoned;
        }
        self.conversation().set_status(reply_id, MessageStatus::Streaming);

        match self.player.play_and_collect(stream, &mut self.shutdown).await {
            Ok(asset) => {
                if self.is_shut_down() {
                    return JobOutcome::Abandoned;
                }
                self.conversation().attach_audio(reply_id, asset);
                JobOutcome::Completed
            }
            Err(e) => self.fail(Stage::Synthesize, &e, Some(reply_id)),
        }
    }

    fn fail(&self, stage: Stage, error: &Error, reply: Option<uuid::Uuid>) -> JobOutcome {
        if matches!(error, Error::Cancelled) || self.is_shut_down() {
            tracing::debug!(?stage, "job abandoned at shutdown");
            return JobOutcome::Abandoned;
        }

        tracing::error!(?stage, error = %error, "pipeline stage failed");
        let mut conversation = self.conversation();
        if let Some(id) = reply {
            conversation.set_status(id, MessageStatus::Error);
        }
        conversation.push_error(&error.to_string());
        JobOutcome::Failed(stage)
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Await a service call, bounded by `timeout` when set
async fn call<T>(
    timeout: Option<Duration>,
    service: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout {
                service,
                after: limit,
            })?,
        None => fut.await,
    }
}
