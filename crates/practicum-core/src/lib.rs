//! # practicum-core
//!
//! Deterministic evidence verification for the Practicum learning platform.
//!
//! This crate answers, without any network call:
//! - Is this completion token authentic, and does it satisfy the track?
//! - Does this GitHub URL parse, and does the learner own what it points at?
//! - Is this untrusted text safe to put in a prompt, or show to a learner?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same input, same verdict (clock-dependent token
//!    timestamp tolerance aside)
//! 2. **No network**: everything here runs offline; the async pipeline
//!    lives in `practicum-runtime`
//! 3. **Constant-time**: token signatures are compared without early exit
//! 4. **Uniform verdicts**: every verification path produces the same
//!    [`Verdict`] shape
//!
//! ## Example
//!
//! ```rust,ignore
//! use practicum_core::token::{TokenConfig, TokenVerifier};
//! use practicum_core::types::Environment;
//!
//! let verifier = TokenVerifier::new(TokenConfig {
//!     master_secret: std::env::var("PRACTICUM_MASTER_SECRET")?.into(),
//!     environment: Environment::Production,
//! })?;
//!
//! let verdict = verifier.verify_challenge_token(&token, "alice", None);
//! println!("{}: {}", verdict.is_valid, verdict.message);
//! ```

pub mod ownership;
pub mod sanitize;
pub mod token;
pub mod types;

// Re-export main types at crate root
pub use ownership::{
    check_ownership, parse_profile, parse_pull_url, parse_repo_url, OwnershipError, PullRef,
    RepoRef,
};
pub use sanitize::{
    detect_injection, sanitize_feedback, sanitize_untrusted_input, strip_code_fences,
    truncate_chars, MAX_FEEDBACK_CHARS,
};
pub use token::{
    ConfigError, TokenConfig, TokenVerifier, CHALLENGES_REQUIRED, NETWORK_LABS_REQUIRED,
    PLACEHOLDER_SECRET,
};
pub use types::{
    Environment, Requirement, Submission, SubmissionKind, TaskDefinition, TaskResult, Verdict,
    TEMPORARILY_UNAVAILABLE,
};
