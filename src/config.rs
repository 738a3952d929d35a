//! Configuration management for the cooking-mode voice assistant
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `COOKMODE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External service endpoints
    pub services: ServiceConfig,

    /// Synthesized voice parameters
    pub voice: VoiceConfig,

    /// Voice-activity detection tuning
    pub vad: VadConfig,
}

/// Endpoints of the speech-to-text, classification and speech services
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the speech-to-text service
    pub stt_url: String,

    /// Base URL of the intent classification service
    pub classify_url: String,

    /// Base URL of the speech synthesis service
    pub tts_url: String,

    /// Per-call timeout in seconds; unset means wait indefinitely
    pub request_timeout_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stt_url: "http://localhost:14184".to_string(),
            classify_url: "http://localhost:14186".to_string(),
            tts_url: "http://localhost:14185".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl ServiceConfig {
    /// Configured timeout as a duration
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Voice parameters sent with every synthesis request
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Reference voice ("tone") name
    pub tone: String,

    /// Language of the spoken text
    pub text_lang: String,

    /// Speed multiplier
    pub speed_factor: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            tone: "kiwi".to_string(),
            text_lang: "ko".to_string(),
            speed_factor: 1.0,
        }
    }
}

/// Voice-activity detection tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS level at or above which a window counts as speech
    pub threshold: f32,

    /// Continuous quiet needed to end a segment
    pub silence_ms: u64,

    /// Segments shorter than this are treated as noise
    pub min_speech_ms: u64,

    /// Number of most recent samples the RMS is computed over
    pub window: usize,

    /// Interval between VAD ticks
    pub frame_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            silence_ms: 800,
            min_speech_ms: 300,
            window: 2048,
            frame_ms: 16,
        }
    }
}

impl VadConfig {
    /// Silence hysteresis window
    #[must_use]
    pub const fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    /// Minimum speech duration
    #[must_use]
    pub const fn min_speech(&self) -> Duration {
        Duration::from_millis(self.min_speech_ms)
    }

    /// Tick interval of the capture loop
    #[must_use]
    pub const fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }
}

/// Default location of the config file (`~/.config/cookmode/cookmode.toml` on Linux)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "cookmode", "cookmode")
        .map(|d| d.config_dir().join("cookmode.toml"))
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    ///
    /// An explicit `path` must exist; the default path is used only if present.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or values are invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override values from environment variables
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("COOKMODE_STT_URL") {
            self.services.stt_url = url;
        }
        if let Some(url) = var("COOKMODE_CLASSIFY_URL") {
            self.services.classify_url = url;
        }
        if let Some(url) = var("COOKMODE_TTS_URL") {
            self.services.tts_url = url;
        }
        if let Some(secs) = var("COOKMODE_REQUEST_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(secs) => self.services.request_timeout_secs = Some(secs),
                Err(e) => tracing::warn!(value = %secs, error = %e, "ignoring invalid timeout"),
            }
        }
        if let Some(tone) = var("COOKMODE_TTS_TONE") {
            self.voice.tone = tone;
        }
        if let Some(lang) = var("COOKMODE_TTS_LANG") {
            self.voice.text_lang = lang;
        }
        if let Some(speed) = var("COOKMODE_TTS_SPEED") {
            match speed.parse() {
                Ok(speed) => self.voice.speed_factor = speed,
                Err(e) => tracing::warn!(value = %speed, error = %e, "ignoring invalid speed"),
            }
        }
    }

    /// Check that values are usable
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("stt_url", &self.services.stt_url),
            ("classify_url", &self.services.classify_url),
            ("tts_url", &self.services.tts_url),
        ] {
            if url.trim().is_empty() {
                return Err(Error::Config(format!("services.{name} must not be empty")));
            }
        }

        if self.services.request_timeout_secs == Some(0) {
            return Err(Error::Config(
                "services.request_timeout_secs must be positive".to_string(),
            ));
        }

        if self.voice.speed_factor <= 0.0 {
            return Err(Error::Config("voice.speed_factor must be positive".to_string()));
        }

        if !(self.vad.threshold > 0.0 && self.vad.threshold <= 1.0) {
            return Err(Error::Config("vad.threshold must be in (0, 1]".to_string()));
        }

        if self.vad.window == 0 || self.vad.frame_ms == 0 {
            return Err(Error::Config(
                "vad.window and vad.frame_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
