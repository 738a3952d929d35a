//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::{Error, Result};

/// Path of the raw-bytes transcription endpoint
const TRANSCRIBE_PATH: &str = "/transcribe_bytes";

/// Response from the transcription service
#[derive(serde::Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: Option<String>,
}

/// Turns recorded speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one encoded audio segment
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Transcribes speech via the speech-to-text service
pub struct SpeechToText {
    client: reqwest::Client,
    url: String,
}

impl SpeechToText {
    /// Create a new STT client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(base_url: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(Error::Config("STT service URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: format!("{base}{TRANSCRIBE_PATH}"),
        })
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "STT request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "STT API error");
            return Err(Error::Stt(format!("HTTP {status}: {body}")));
        }

        let result: TranscribeResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let text = result.text.unwrap_or_default();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}
