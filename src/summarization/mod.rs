//! Abstractions for generating abstractive summaries through HTTP backends.
//!
//! Two adapters are provided: an OpenAI-compatible chat-completions client and a client for a
//! local Ollama runtime. Both issue requests directly with `reqwest` and classify every failure
//! as transient (worth retrying) or permanent, so the engine can apply its retry policy without
//! knowing which backend is in use.

use crate::config::{Config, SummaryProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const SYSTEM_PROMPT: &str =
    "You are a text summarization expert. You provide accurate and concise summaries.";
const TEMPERATURE: f32 = 0.3;
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Errors surfaced while generating a summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummarizationClientError {
    /// Provider could not be reached (connection refused, reset, DNS).
    #[error("Summarization provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The call did not finish within the per-call timeout.
    #[error("Summarization call timed out after {0:?}")]
    Timeout(Duration),
    /// Provider answered with a non-success HTTP status.
    #[error("Provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// Provider refused the content under its usage policy.
    #[error("Provider refused to summarize the content: {0}")]
    ContentFiltered(String),
    /// Provider response could not be decoded.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl SummarizationClientError {
    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts, rate limits (429), request timeouts (408), server errors (5xx) and transport
    /// failures are transient; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderUnavailable(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || (500..600).contains(status)
            }
            Self::ContentFiltered(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Request payload passed to the summarization provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizationRequest {
    /// Fully qualified model identifier understood by the provider.
    pub model: String,
    /// Instruction selected by the request's summary type.
    pub instruction: String,
    /// Text to summarize.
    pub text: String,
}

impl SummarizationRequest {
    /// The user message sent to the model: instruction, blank line, text.
    pub fn user_message(&self) -> String {
        format!("{}\n\n{}", self.instruction, self.text)
    }
}

/// Interface implemented by summarization backends.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Generate a summary of `request.text` following `request.instruction`.
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError>;
}

/// Build the summarization client selected by configuration.
pub fn get_summarization_client(config: &Config) -> Arc<dyn SummarizationClient> {
    match config.summary_provider {
        SummaryProvider::OpenAI => {
            let base_url = config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            Arc::new(OpenAiSummarizationClient::new(
                base_url,
                config.openai_api_key.clone().unwrap_or_default(),
                config.summary_max_output_tokens,
            ))
        }
        SummaryProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Arc::new(OllamaSummarizationClient::new(
                base_url,
                config.summary_max_output_tokens,
            ))
        }
    }
}

fn http_client() -> Client {
    Client::builder()
        .user_agent("inbox-digest/summary")
        .build()
        .expect("Failed to construct reqwest::Client for summarization")
}

fn unavailable(base_url: &str, error: reqwest::Error) -> SummarizationClientError {
    SummarizationClientError::ProviderUnavailable(format!("failed to reach {base_url}: {error}"))
}

async fn status_error(response: reqwest::Response) -> SummarizationClientError {
    let status = response.status().as_u16();
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect();
    SummarizationClientError::Status { status, body }
}

/// Client for OpenAI-compatible `chat/completions` endpoints.
pub struct OpenAiSummarizationClient {
    http: Client,
    base_url: String,
    api_key: String,
    max_output_tokens: u32,
}

impl OpenAiSummarizationClient {
    /// Create a client for `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(base_url: String, api_key: String, max_output_tokens: u32) -> Self {
        Self {
            http: http_client(),
            base_url,
            api_key,
            max_output_tokens,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl SummarizationClient for OpenAiSummarizationClient {
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError> {
        let payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.user_message() },
            ],
            "max_tokens": self.max_output_tokens,
            "temperature": TEMPERATURE,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| unavailable(&self.base_url, error))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: ChatCompletion = response.json().await.map_err(|error| {
            SummarizationClientError::InvalidResponse(format!(
                "failed to decode chat completion: {error}"
            ))
        })?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            SummarizationClientError::InvalidResponse("response contained no choices".into())
        })?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(SummarizationClientError::ContentFiltered(format!(
                "model {} stopped with finish_reason=content_filter",
                request.model
            )));
        }

        let content = choice.message.content.unwrap_or_default();
        let summary = content.trim();
        if summary.is_empty() {
            return Err(SummarizationClientError::InvalidResponse(
                "response contained an empty message".into(),
            ));
        }
        Ok(summary.to_string())
    }
}

/// Client for a local Ollama runtime (`/api/generate`).
pub struct OllamaSummarizationClient {
    http: Client,
    base_url: String,
    max_output_tokens: u32,
}

impl OllamaSummarizationClient {
    /// Create a client for the runtime at `base_url`.
    pub fn new(base_url: String, max_output_tokens: u32) -> Self {
        Self {
            http: http_client(),
            base_url,
            max_output_tokens,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl SummarizationClient for OllamaSummarizationClient {
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError> {
        let payload = json!({
            "model": request.model,
            "system": SYSTEM_PROMPT,
            "prompt": request.user_message(),
            "stream": false,
            "options": {
                "temperature": TEMPERATURE,
                "num_predict": self.max_output_tokens,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| unavailable(&self.base_url, error))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            SummarizationClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(SummarizationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        let summary = body.response.trim();
        if summary.is_empty() {
            return Err(SummarizationClientError::InvalidResponse(
                "Ollama returned an empty response".into(),
            ));
        }
        Ok(summary.to_string())
    }
}
