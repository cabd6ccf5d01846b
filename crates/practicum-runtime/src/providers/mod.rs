//! The model seam behind the grading engine.
//!
//! Grading traffic has exactly one shape: a trusted system prompt the
//! pipeline controls plus a single untrusted payload assembled from
//! learner evidence. [`CompletionRequest`] captures that call, and
//! [`LlmProvider`] is the seam tests replace with scripted doubles.
//! API keys live in [`Credential`] values that never print.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod anthropic;
pub mod credentials;

pub use anthropic::{AnthropicProvider, ANTHROPIC_API_KEY_ENV};
pub use credentials::{Credential, CredentialOrigin};

/// Model used when neither the config file nor the environment names one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250514";

/// Ways a model call can fail.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request never produced an HTTP response.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// 429 from the API, with the server's backoff hint when it gave one.
    #[error("provider throttled (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    /// A non-success status with whatever message could be decoded.
    #[error("provider rejected the call: {status} {message}")]
    Api { status: u16, message: String },

    /// A success status whose body did not decode.
    #[error("unreadable provider reply: {0}")]
    MalformedReply(String),

    /// The per-attempt deadline elapsed.
    #[error("provider call timed out after {0:?}")]
    TimedOut(Duration),

    /// Missing credential or similar wiring problem.
    #[error("provider not configured: {0}")]
    Unconfigured(String),
}

/// One grading call: a trusted system prompt, one untrusted user payload,
/// and the generation settings for this call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Instructions the pipeline controls. Stable across calls of the
    /// same kind, which is what makes caching it worthwhile.
    pub system: String,

    /// The learner-derived payload. Callers sanitize before building
    /// the request.
    pub user: String,

    /// Model identifier.
    pub model: String,

    /// Generation cap.
    pub max_tokens: u32,

    /// Sampling temperature. Grading pins 0.0.
    pub temperature: f32,

    /// Per-attempt deadline, enforced by the HTTP client.
    pub timeout: Duration,

    /// Ask the API to cache the system prompt between calls.
    pub cache_system: bool,
}

impl CompletionRequest {
    /// A request with the pipeline defaults for everything but the prompts.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
            cache_system: true,
        }
    }
}

/// A finished completion.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The reply's text blocks, concatenated.
    pub text: String,

    /// The model that served the call.
    pub model: String,

    /// Why generation stopped, when the API says.
    pub stop_reason: Option<String>,

    /// Token accounting for log lines.
    pub usage: Usage,
}

/// Token counts for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Input tokens served from the prompt cache.
    pub cached_input_tokens: u32,
}

impl Usage {
    /// Input plus output.
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// The only place model calls are made. The dispatcher never talks to a
/// provider directly; the grading engine does, through this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Whether the provider is usable at all. Must not spend tokens.
    async fn health_check(&self) -> bool;

    /// Short name for log lines.
    fn name(&self) -> &str;
}
