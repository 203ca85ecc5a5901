//! Model backend seam and the OpenAI-compatible HTTP implementation.
//!
//! The concrete provider is pluggable; the governor only needs
//! [`ModelBackend`]. [`HttpModelBackend`] speaks the OpenAI chat completion
//! wire format, which most hosted and local providers accept.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::prompt::{ChatPrompt, TokenUsage};

/// Raw backend outcome before the governor maps it into its error taxonomy.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend rejected the credential (HTTP 401/403).
    #[error("credential rejected by backend: {0}")]
    AuthRejected(String),
    /// Transport or server-side failure, treated as transient.
    #[error("backend transport failure: {0}")]
    Transport(String),
    /// The response body did not match the expected wire format.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackendCompletion {
    pub content: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &ChatPrompt,
        model: &str,
        api_key: &SecretString,
    ) -> Result<BackendCompletion, BackendError>;
}

pub struct HttpModelBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpModelBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(
        &self,
        prompt: &ChatPrompt,
        model: &str,
        api_key: &SecretString,
    ) -> Result<BackendCompletion, BackendError> {
        let url = self.completions_url();
        let wire_request = WireRequest {
            model,
            messages: prompt
                .messages
                .iter()
                .map(|message| WireMessage { role: &message.role, content: &message.content })
                .collect(),
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };

        debug!(model, messages = prompt.messages.len(), "sending chat completion request");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(|error| BackendError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(BackendError::AuthRejected(body));
            }
            return Err(BackendError::Transport(format!("HTTP {status}: {body}")));
        }

        let wire_response: WireResponse = response
            .json()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

        let content = wire_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| BackendError::InvalidResponse("response had no choices".to_string()))?;

        let usage = wire_response
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            })
            .unwrap_or_default();

        Ok(BackendCompletion { content, usage })
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
