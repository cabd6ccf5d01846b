//! Anthropic Messages API client.
//!
//! One POST per grading call. The HTTP client is injected at
//! construction so the whole pipeline shares a connection pool, and the
//! API key sits in a [`Credential`] that redacts itself in debug output.
//!
//! The system prompt is sent as its own content block carrying the
//! `ephemeral` cache marker: it is identical across calls of the same
//! kind, so the cache hit pays for itself from the second submission on.
//! The per-call user payload is never marked cacheable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::credentials::Credential;
use super::{Completion, CompletionRequest, LlmProvider, ProviderError, Usage};

/// Environment variable holding the API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API.
#[derive(Debug)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    credential: Credential,
    base_url: String,
}

impl AnthropicProvider {
    /// Build with an explicit key. Mostly for tests and embedding callers;
    /// production wiring uses [`AnthropicProvider::from_env`].
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            credential: Credential::inline(api_key, "Anthropic API key"),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Build from `ANTHROPIC_API_KEY`.
    pub fn from_env(client: reqwest::Client) -> Result<Self, ProviderError> {
        Ok(Self {
            client,
            credential: Credential::required(ANTHROPIC_API_KEY_ENV, "Anthropic API key")?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at a different endpoint (test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: [WireBlock<'a>; 1],
    messages: [WireMessage<'a>; 1],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: [WireBlock<'a>; 1],
}

#[derive(Serialize)]
struct WireBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheMarker>,
}

#[derive(Serialize)]
struct CacheMarker {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl CacheMarker {
    fn ephemeral() -> Self {
        Self { kind: "ephemeral" }
    }
}

fn wire_body(request: &CompletionRequest) -> WireRequest<'_> {
    WireRequest {
        model: &request.model,
        max_tokens: request.max_tokens,
        // Sent even at 0.0: the API default is not deterministic.
        temperature: request.temperature,
        system: [WireBlock {
            kind: "text",
            text: &request.system,
            cache_control: request.cache_system.then(CacheMarker::ephemeral),
        }],
        messages: [WireMessage {
            role: "user",
            content: [WireBlock {
                kind: "text",
                text: &request.user,
                cache_control: None,
            }],
        }],
    }
}

#[derive(Deserialize)]
struct WireReply {
    content: Vec<ReplyBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize)]
struct ReplyBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[derive(Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(Deserialize)]
struct WireErrorBody {
    message: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            // The key leaves the Credential only here.
            .header("x-api-key", self.credential.reveal())
            .header("anthropic-version", API_VERSION)
            .timeout(request.timeout)
            .json(&wire_body(request))
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ProviderError::TimedOut(request.timeout)
                } else {
                    ProviderError::Unreachable(error.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::Throttled { retry_after });
        }
        if !status.is_success() {
            // Keep the status even when the error body is not JSON.
            let message = match response.json::<WireError>().await {
                Ok(decoded) => decoded.error.message,
                Err(_) => format!("status {}", status),
            };
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: WireReply = response
            .json()
            .await
            .map_err(|error| ProviderError::MalformedReply(error.to_string()))?;

        let mut text = String::new();
        for block in reply.content {
            if let Some(part) = block.text {
                text.push_str(&part);
            }
        }

        Ok(Completion {
            text,
            model: reply.model,
            stop_reason: reply.stop_reason,
            usage: Usage {
                input_tokens: reply.usage.input_tokens,
                output_tokens: reply.usage.output_tokens,
                cached_input_tokens: reply.usage.cache_read_input_tokens,
            },
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_blank()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
