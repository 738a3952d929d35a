//! Error types for the cooking-mode voice assistant

use std::time::Duration;

use thiserror::Error;

/// Result type alias for cookmode operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Recipe loading error
    #[error("recipe error: {0}")]
    Recipe(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Intent classification error
    #[error("classification error: {0}")]
    Classify(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// An external service call exceeded the configured timeout
    #[error("{service} timed out after {after:?}")]
    Timeout {
        /// Which service was being called
        service: &'static str,
        /// Configured timeout
        after: Duration,
    },

    /// Work abandoned because the session is shutting down
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
