//! Intent classification and reply generation

use async_trait::async_trait;

use crate::{Error, Result};

/// Path of the classification endpoint
const CLASSIFY_PATH: &str = "/classify";

/// Reply when the service gives no text for an advance intent
pub const FALLBACK_NEXT: &str = "다음 단계로 넘어갈게요.";

/// Reply when the service gives no text for a retreat intent
pub const FALLBACK_PREV: &str = "이전 단계로 돌아갈게요.";

/// Reply when the service gives no text and the intent is unclear
pub const FALLBACK_UNCLEAR: &str = "알겠어요. 조금만 더 자세히 말해줄래요?";

/// Coarse meaning of a user utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Go to the next recipe step
    NextStep,
    /// Go back to the previous recipe step
    PrevStep,
    /// A tag this client does not act on
    Other(String),
    /// No intent reported
    None,
}

impl Intent {
    /// Parse the service's intent tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "next_step" => Self::NextStep,
            "prev_step" => Self::PrevStep,
            "" => Self::None,
            other => Self::Other(other.to_string()),
        }
    }

    /// Step movement implied by this intent
    #[must_use]
    pub const fn step_delta(&self) -> i8 {
        match self {
            Self::NextStep => 1,
            Self::PrevStep => -1,
            Self::Other(_) | Self::None => 0,
        }
    }

    /// Canned reply used when the service returns no text
    #[must_use]
    pub const fn fallback_reply(&self) -> &'static str {
        match self {
            Self::NextStep => FALLBACK_NEXT,
            Self::PrevStep => FALLBACK_PREV,
            Self::Other(_) | Self::None => FALLBACK_UNCLEAR,
        }
    }
}

/// Intent and spoken reply for one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Classified intent
    pub intent: Intent,
    /// Reply to speak; never empty
    pub reply: String,
}

impl Classification {
    /// Build from raw service output, substituting a fallback reply
    #[must_use]
    pub fn new(intent: Intent, reply: &str) -> Self {
        let reply = reply.trim();
        let reply = if reply.is_empty() {
            intent.fallback_reply().to_string()
        } else {
            reply.to_string()
        };
        Self { intent, reply }
    }
}

/// Classifies user speech against the current recipe step
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify `text` in the context of `current_step`
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn classify(&self, text: &str, current_step: &str) -> Result<Classification>;
}

#[derive(serde::Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    current_step: &'a str,
}

#[derive(serde::Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default, rename = "responseText")]
    response_text: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

impl ClassifyResponse {
    fn into_classification(self) -> Classification {
        let intent = Intent::from_tag(self.intent.as_deref().unwrap_or_default());
        let reply = self
            .response_text
            .filter(|t| !t.is_empty())
            .or(self.response)
            .unwrap_or_default();
        Classification::new(intent, &reply)
    }
}

/// Client for the intent classification service
pub struct IntentClassifier {
    client: reqwest::Client,
    url: String,
}

impl IntentClassifier {
    /// Create a classifier client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(base_url: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(Error::Config("classification service URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: format!("{base}{CLASSIFY_PATH}"),
        })
    }
}

#[async_trait]
impl Classifier for IntentClassifier {
    async fn classify(&self, text: &str, current_step: &str) -> Result<Classification> {
        tracing::debug!(text, "classifying");

        let response = self
            .client
            .post(&self.url)
            .json(&ClassifyRequest { text, current_step })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Classify(format!("HTTP {status}: {body}")));
        }

        let parsed: ClassifyResponse = response.json().await?;
        let classification = parsed.into_classification();
        tracing::info!(intent = ?classification.intent, reply = %classification.reply, "classified");
        Ok(classification)
    }
}
