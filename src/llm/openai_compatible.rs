// ABOUTME: Streaming client for OpenAI-compatible chat completion endpoints
// ABOUTME: Serves Gemini's compatibility endpoint, Groq and local servers such as Ollama or vLLM
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # OpenAI-Compatible Provider
//!
//! Any backend exposing `POST {base_url}/chat/completions` with `stream: true`
//! can be relayed through this client. Gemini, Groq and local inference servers
//! all offer such an endpoint, so one implementation covers every configured
//! backend; they differ only in base URL, credentials and provider name.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::sse_parser::sse_chunk_stream;
use super::{ChatMessage, ChatRequest, ChatStream, LlmProvider, StreamChunk};
use crate::constants::defaults;
use crate::errors::{AppError, ErrorCode};

/// Connection timeout for backend requests
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Retries of the initial request on connect errors or 429/502/503
const MAX_CONNECT_RETRIES: u32 = 2;
/// Base delay between connection retries
const RETRY_BASE_DELAY_MS: u64 = 300;

// ============================================================================
// API Request/Response Types (OpenAI-compatible format)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for one `OpenAI`-compatible backend
#[derive(Clone)]
pub struct OpenAiCompatibleConfig {
    /// Provider name used by the model catalog
    pub name: String,
    /// Base URL for the API (e.g., <http://localhost:11434/v1>)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiCompatibleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl OpenAiCompatibleConfig {
    /// Gemini through its `OpenAI` compatibility endpoint
    #[must_use]
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self {
            name: "gemini".to_owned(),
            base_url: defaults::GEMINI_BASE_URL.to_owned(),
            api_key: Some(api_key.into()),
        }
    }

    /// Groq
    #[must_use]
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self {
            name: "groq".to_owned(),
            base_url: defaults::GROQ_BASE_URL.to_owned(),
            api_key: Some(api_key.into()),
        }
    }

    /// A local server (Ollama, vLLM, `LocalAI`)
    #[must_use]
    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            name: "local".to_owned(),
            base_url: base_url.into(),
            api_key: None,
        }
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Generic `OpenAI`-compatible streaming provider
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider with the given configuration
    ///
    /// No overall request timeout is set; the relay enforces idle and total timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn error_from_response(&self, status: StatusCode, body: &str) -> AppError {
        let detail = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
            |_| body.chars().take(200).collect::<String>(),
            |envelope| envelope.error.message,
        );

        match status.as_u16() {
            401 | 403 => AppError::new(
                ErrorCode::ExternalServiceError,
                format!("{} rejected the gateway credentials", self.config.name),
            ),
            429 => AppError::new(
                ErrorCode::ExternalServiceUnavailable,
                format!("{} is rate limiting requests, try again shortly", self.config.name),
            ),
            502..=504 => AppError::new(
                ErrorCode::ExternalServiceUnavailable,
                format!("{} is not responding", self.config.name),
            ),
            _ => AppError::external_service(
                self.config.name.clone(),
                format!("API error ({status}): {detail}"),
            ),
        }
    }

    fn decode_chunk(payload: &str) -> Option<Result<StreamChunk, AppError>> {
        match serde_json::from_str::<CompletionChunk>(payload) {
            Ok(chunk) => {
                let choice = chunk.choices.into_iter().next()?;
                let delta = choice.delta.content.unwrap_or_default();
                Some(Ok(StreamChunk {
                    delta,
                    is_final: choice.finish_reason.is_some(),
                    finish_reason: choice.finish_reason,
                }))
            }
            Err(e) => {
                warn!("Skipping unparsable stream payload: {}", e);
                None
            }
        }
    }

    async fn send_with_retry(
        &self,
        body: &CompletionRequest<'_>,
    ) -> Result<reqwest::Response, AppError> {
        let mut attempt = 0;
        loop {
            let request = self
                .authorized(self.client.post(self.api_url("chat/completions")))
                .json(body);

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if attempt < MAX_CONNECT_RETRIES
                        && matches!(response.status().as_u16(), 429 | 502 | 503) =>
                {
                    warn!(
                        provider = %self.config.name,
                        status = %response.status(),
                        attempt,
                        "Retryable status opening stream"
                    );
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(self.error_from_response(status, &text));
                }
                Err(e) if attempt < MAX_CONNECT_RETRIES && e.is_connect() => {
                    warn!(provider = %self.config.name, attempt, "Connect failed: {}", e);
                }
                Err(e) => {
                    error!(provider = %self.config.name, "Failed to open stream: {}", e);
                    return Err(AppError::from(e));
                }
            }

            attempt += 1;
            tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS << attempt)).await;
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self, request), fields(provider = %self.config.name, model = %request.model))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        debug!(messages = request.messages.len(), "Opening streaming completion");

        let body = CompletionRequest {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let response = self.send_with_retry(&body).await?;
        Ok(sse_chunk_stream(
            response.bytes_stream(),
            Self::decode_chunk,
            "model backend",
        ))
    }

    #[instrument(skip(self), fields(provider = %self.config.name))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let response = self
            .authorized(self.client.get(self.api_url("models")))
            .send()
            .await?;
        let healthy = response.status().is_success();
        if !healthy {
            warn!(status = %response.status(), "Provider health check failed");
        }
        Ok(healthy)
    }
}
