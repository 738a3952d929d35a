//! Text-to-speech (TTS) processing
//!
//! The speech service streams raw 16-bit mono PCM; its sample rate is
//! declared in the `X-Sample-Rate` response header.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Path of the streaming synthesis endpoint
const SYNTHESIZE_PATH: &str = "/synthesize/stream";

/// Header carrying the PCM sample rate
const SAMPLE_RATE_HEADER: &str = "X-Sample-Rate";

/// Sample rate assumed when the header is missing or malformed
pub const DEFAULT_TTS_SAMPLE_RATE: u32 = 32000;

/// Synthesized speech arriving chunk by chunk
pub struct SpeechStream {
    /// Declared sample rate of the PCM data
    pub sample_rate: u32,
    /// Byte chunks in arrival order; boundaries are arbitrary
    pub chunks: BoxStream<'static, Result<Vec<u8>>>,
}

impl std::fmt::Debug for SpeechStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechStream")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

/// Produces streamed speech for reply text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing `text`
    ///
    /// # Errors
    ///
    /// Returns error if the service rejects the request
    async fn synthesize(&self, text: &str) -> Result<SpeechStream>;
}

/// Synthesizes speech via the streaming speech service
pub struct TextToSpeech {
    client: reqwest::Client,
    url: String,
    voice: VoiceConfig,
}

impl TextToSpeech {
    /// Create a TTS client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(base_url: &str, voice: VoiceConfig) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(Error::Config("TTS service URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: format!("{base}{SYNTHESIZE_PATH}"),
            voice,
        })
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<SpeechStream> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            text: &'a str,
            tone: &'a str,
            text_lang: &'a str,
            speed_factor: f32,
        }

        let request = TtsRequest {
            text,
            tone: &self.voice.tone,
            text_lang: &self.voice.text_lang,
            speed_factor: self.voice.speed_factor,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("HTTP {status}: {body}")));
        }

        let sample_rate = parse_sample_rate(
            response
                .headers()
                .get(SAMPLE_RATE_HEADER)
                .and_then(|v| v.to_str().ok()),
        );
        tracing::debug!(sample_rate, "speech stream opened");

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from))
            .boxed();

        Ok(SpeechStream {
            sample_rate,
            chunks,
        })
    }
}

/// Parse the sample-rate header, falling back to the service default
fn parse_sample_rate(header: Option<&str>) -> u32 {
    header
        .and_then(|v| v.trim().parse().ok())
        .filter(|&rate| rate > 0)
        .unwrap_or(DEFAULT_TTS_SAMPLE_RATE)
}
