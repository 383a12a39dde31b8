//! Natural-language translator clients
//!
//! The translator turns a plain-English request ("show me the nodes") into a
//! candidate command ("get nodes"). Two backends are supported:
//!
//! - **predict**: a seq2seq inference service answering
//!   `GET /predict?q=...` with `{"input": ..., "output": ...}`
//! - **openai**: any OpenAI-compatible `/v1/chat/completions` endpoint
//!
//! Whatever the backend returns is untrusted text. It is normalized here and
//! then handed to the policy validator; nothing in this module executes it.

use crate::error::GatewayError;
use crate::metrics;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default base URL of the predict service
pub const DEFAULT_TRANSLATOR_URL: &str = "http://localhost:5000";

/// Default chat model for the openai backend
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are a strict translator. Translate the user's plain-English \
Kubernetes request into a single kubectl command only. Output only the command, no extra text, \
no explanations, no markdown.";

/// Language tags accepted after an opening code fence
const FENCE_LANGUAGES: &[&str] = &["bash", "shell", "sh", "console"];

/// Translator failures
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("Translator unreachable: {0}")]
    Unreachable(String),

    #[error("Translator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Translator response could not be decoded: {0}")]
    InvalidResponse(String),
}

impl From<TranslationError> for GatewayError {
    fn from(error: TranslationError) -> Self {
        let upstream_status = match &error {
            TranslationError::Status { status, .. } => Some(*status),
            _ => None,
        };
        GatewayError::TranslationFailure {
            message: error.to_string(),
            upstream_status,
        }
    }
}

/// Upstream natural-language to command translation
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate a request into raw command text
    async fn translate(&self, nlp: &str) -> Result<String, TranslationError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Translate and normalize, mapping failures onto the gateway taxonomy
///
/// Returns `TranslationFailure` if the translator fails and
/// `GenerationFailure` if nothing usable is left after normalization.
pub async fn translate_command(
    translator: &dyn Translator,
    nlp: &str,
) -> Result<String, GatewayError> {
    let raw = match translator.translate(nlp).await {
        Ok(raw) => {
            metrics::record_translation("ok");
            raw
        }
        Err(e) => {
            warn!(backend = translator.name(), "Translation failed: {}", e);
            metrics::record_translation("error");
            metrics::record_rejection("translation_failure");
            return Err(e.into());
        }
    };

    debug!(backend = translator.name(), raw = %raw, "Translator output");

    let command = normalize_translation(&raw);
    if command.is_empty() {
        metrics::record_rejection("generation_failure");
        return Err(GatewayError::GenerationFailure);
    }
    Ok(command)
}

/// Clean raw translator output into a candidate command
///
/// Strips a markdown code fence and a leading `kubectl` token.
///
/// ```
/// use kubenlp_gateway::translator::normalize_translation;
///
/// assert_eq!(normalize_translation("```bash\nkubectl get pods\n```"), "get pods");
/// assert_eq!(normalize_translation("  kubectl   logs web-0 "), "logs web-0");
/// assert_eq!(normalize_translation("describe node a"), "describe node a");
/// ```
pub fn normalize_translation(raw: &str) -> String {
    let text = strip_code_fence(raw.trim()).trim();

    let text = match text.split_once(char::is_whitespace) {
        Some((first, rest)) if first == "kubectl" => rest,
        None if text == "kubectl" => "",
        _ => text,
    };

    text.trim().to_string()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);

    for tag in FENCE_LANGUAGES {
        if let Some(rest) = inner.strip_prefix(tag) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest;
            }
        }
    }
    inner
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TranslationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TranslationError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    output: String,
}

/// Client for the seq2seq predict service
#[derive(Debug, Clone)]
pub struct PredictTranslator {
    client: reqwest::Client,
    base_url: String,
}

impl PredictTranslator {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get the service URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Translator for PredictTranslator {
    async fn translate(&self, nlp: &str) -> Result<String, TranslationError> {
        let url = format!("{}/predict", self.base_url);
        debug!("Sending GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("q", nlp)])
            .send()
            .await
            .map_err(|e| TranslationError::Unreachable(e.to_string()))?;

        let response = check_status(response).await?;
        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;

        Ok(body.output)
    }

    fn name(&self) -> &str {
        "predict"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone)]
pub struct OpenAiTranslator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiTranslator {
    /// Create a client
    ///
    /// `api_key` is sent as a bearer token when present.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    /// Get the model name
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, nlp: &str) -> Result<String, TranslationError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: nlp,
                },
            ],
            temperature: 0.3,
            max_tokens: 150,
        };

        debug!(model = %self.model, "Sending POST {}", url);

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TranslationError::Unreachable(e.to_string()))?;

        let response = check_status(response).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;

        // An empty choice list is an empty generation, not a transport error
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "openai"
    }
}
