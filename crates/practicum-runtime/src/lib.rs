//! # practicum-runtime
//!
//! Async verification runtime for the Practicum evidence pipeline.
//!
//! Everything that talks to the outside world lives here:
//! - GitHub lookups (profiles, forks, pull requests, file trees)
//! - LLM grading of repository evidence and rubric submissions
//! - The resilience layer every external call goes through
//! - The dispatcher that routes a submission to its verifier
//!
//! The deterministic half (token verification, URL parsing, sanitization)
//! lives in `practicum-core`; this crate depends on it, never the reverse.
//!
//! ## Key Guarantees
//!
//! 1. **One outcome type**: [`Dispatcher::verify_submission`] always returns
//!    a [`practicum_core::Verdict`], never an error
//! 2. **Fail closed**: dependency failures become "temporarily unavailable"
//!    verdicts with `server_error` set, not passes
//! 3. **Bounded pressure**: retries are capped, circuits open per
//!    dependency, grading concurrency is limited by a semaphore
//! 4. **Untrusted means untrusted**: repository content and model output
//!    are sanitized on the way into prompts and on the way out to learners
//!
//! ## Example
//!
//! ```rust,ignore
//! use practicum_runtime::{Dispatcher, PipelineConfig};
//!
//! let config = PipelineConfig::from_env();
//! let dispatcher = Dispatcher::from_env(&config)?;
//!
//! let verdict = dispatcher.verify_submission(&submission, &requirement).await;
//! println!("{}: {}", verdict.is_valid, verdict.message);
//! ```

pub mod config;
pub mod dispatcher;
pub mod evidence;
pub mod github;
pub mod grader;
pub mod providers;
pub mod resilience;

// Re-export main types at crate root
pub use config::PipelineConfig;
pub use dispatcher::{Dispatcher, SetupError};
pub use evidence::{EvidenceCollector, EvidenceFile, RepoEvidence};
pub use github::{CodeHost, GithubClient, GithubConfig, PullMetadata};
pub use grader::{GradeResult, Grader, GraderConfig, GradingFocus};
pub use providers::{
    AnthropicProvider, Completion, CompletionRequest, Credential, CredentialOrigin, LlmProvider,
    ProviderError, Usage,
};
pub use resilience::{
    CallError, CircuitBreakerConfig, CircuitState, CooldownConfig, ResilienceLayer, RetryPolicy,
};
