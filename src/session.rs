//! Cooking-mode voice session
//!
//! Hosts the capture loop and the pipeline worker on a single thread and
//! owns teardown: stop listening, stop playback, release devices, then
//! release the conversation's audio.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::LocalSet;

use crate::config::Config;
use crate::conversation::{Conversation, Role, SharedConversation};
use crate::recipe::Recipe;
use crate::voice::{Listener, OutputDevice, Pipeline, SampleSource, Services, StreamingPlayer};
use crate::{Error, Result};

/// How long teardown waits for an in-flight job before abandoning it
const TEARDOWN_GRACE: Duration = Duration::from_millis(200);

/// What a finished session leaves behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Step index when the session ended
    pub final_step: usize,
    /// User utterances that were transcribed
    pub utterances: usize,
    /// Assistant replies with attached audio
    pub replies: usize,
    /// Files written by `save_replies_to`
    pub saved: Vec<PathBuf>,
}

/// A voice-driven walk through one recipe
pub struct CookingSession<S> {
    config: Config,
    recipe: Arc<Recipe>,
    start_step: usize,
    source: S,
    services: Services,
    output: Box<dyn OutputDevice>,
    conversation: SharedConversation,
    save_dir: Option<PathBuf>,
}

impl<S: SampleSource + 'static> CookingSession<S> {
    /// Create a session starting at the first step
    #[must_use]
    pub fn new(
        config: Config,
        recipe: Recipe,
        source: S,
        services: Services,
        output: Box<dyn OutputDevice>,
    ) -> Self {
        Self {
            config,
            recipe: Arc::new(recipe),
            start_step: 0,
            source,
            services,
            output,
            conversation: Conversation::shared(),
            save_dir: None,
        }
    }

    /// Start at a given step (clamped to the recipe)
    #[must_use]
    pub const fn start_at(mut self, step: usize) -> Self {
        self.start_step = step;
        self
    }

    /// Write every reply's audio into `dir` at teardown
    #[must_use]
    pub fn save_replies_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Conversation shared with the session
    #[must_use]
    pub fn conversation(&self) -> SharedConversation {
        Arc::clone(&self.conversation)
    }

    /// Run until `stop` completes, then tear everything down
    ///
    /// # Errors
    ///
    /// Returns error if saving replies fails
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> Result<SessionSummary> {
        let local = LocalSet::new();
        local.run_until(self.run_local(stop)).await
    }

    async fn run_local(self, stop: impl Future<Output = ()>) -> Result<SessionSummary> {
        let Self {
            config,
            recipe,
            start_step,
            source,
            services,
            output,
            conversation,
            save_dir,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Pipeline::new(
            services,
            Arc::clone(&recipe),
            start_step,
            Arc::clone(&conversation),
            StreamingPlayer::new(output),
            shutdown_rx.clone(),
        )
        .with_timeout(config.services.request_timeout());

        let mut cursor = pipeline.cursor_updates();
        let listener = Listener::new(
            source,
            &config.vad,
            pipeline.handle(),
            Arc::clone(&conversation),
        );

        tracing::info!(
            recipe = %recipe.name,
            step = pipeline.step(),
            desc = recipe.step_desc(pipeline.step()),
            "cooking session started"
        );

        let listener_task = tokio::task::spawn_local(listener.run(shutdown_rx));
        let worker_task = tokio::task::spawn_local(pipeline.run());
        let worker_abort = worker_task.abort_handle();

        tokio::pin!(stop);
        loop {
            tokio::select! {
                () = &mut stop => break,
                changed = cursor.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let step = *cursor.borrow_and_update();
                    let no = recipe.steps.get(step).map_or(0, |s| s.no);
                    tracing::info!(step = no, desc = recipe.step_desc(step), "now on step");
                }
            }
        }

        tracing::info!("stopping cooking session");
        shutdown_tx.send_replace(true);

        if let Err(e) = listener_task.await {
            tracing::warn!(error = %e, "listener task failed");
        }
        if tokio::time::timeout(TEARDOWN_GRACE, worker_task).await.is_err() {
            tracing::warn!("abandoning in-flight job");
            worker_abort.abort();
        }

        let final_step = *cursor.borrow();
        let mut conversation = conversation.lock().unwrap_or_else(PoisonError::into_inner);
        let saved = match &save_dir {
            Some(dir) => save_replies(&conversation, dir)?,
            None => Vec::new(),
        };
        let summary = SessionSummary {
            final_step,
            utterances: conversation
                .messages()
                .iter()
                .filter(|m| m.role == Role::User)
                .count(),
            replies: conversation
                .messages()
                .iter()
                .filter(|m| m.audio.is_some())
                .count(),
            saved,
        };
        conversation.clear();

        tracing::info!(
            final_step = summary.final_step,
            utterances = summary.utterances,
            replies = summary.replies,
            "cooking session ended"
        );
        Ok(summary)
    }
}

/// Write each reply's audio to `dir` as `reply-NN.wav`
///
/// # Errors
///
/// Returns error if the directory or a file cannot be written
pub fn save_replies(conversation: &Conversation, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Config(format!("cannot create {}: {e}", dir.display())))?;

    let mut saved = Vec::new();
    for (n, audio) in conversation
        .messages()
        .iter()
        .filter_map(|m| m.audio.as_ref())
        .enumerate()
    {
        let path = dir.join(format!("reply-{:02}.wav", n + 1));
        std::fs::write(&path, &audio.bytes)?;
        tracing::debug!(path = %path.display(), "saved reply audio");
        saved.push(path);
    }
    Ok(saved)
}
