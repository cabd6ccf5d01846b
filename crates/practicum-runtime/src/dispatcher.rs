//! Submission dispatch: one entry point that routes evidence to its verifier.
//!
//! The dispatcher owns the kind-to-verifier map. Every verification attempt
//! goes through [`Dispatcher::verify_submission`], which:
//! - enforces the linked-identity precondition before any network or
//!   cryptographic work,
//! - routes the submission to the verifier for its kind,
//! - collapses infrastructure failures into a single "temporarily
//!   unavailable" verdict so learners never see transport internals.
//!
//! Verifiers return `Result<Verdict, CallError>`: `Ok` verdicts are answers
//! about the evidence (pass or fail), `Err` means a dependency kept us from
//! finding out.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use tracing::{info, warn};

use practicum_core::{
    check_ownership, parse_profile, parse_pull_url, parse_repo_url, ConfigError, Requirement,
    Submission, SubmissionKind, TokenConfig, TokenVerifier, Verdict, PLACEHOLDER_SECRET,
};

use crate::config::PipelineConfig;
use crate::evidence::EvidenceCollector;
use crate::github::{CodeHost, GithubClient};
use crate::grader::{Grader, GradingFocus};
use crate::providers::{AnthropicProvider, Credential, LlmProvider, ProviderError};
use crate::resilience::{CallError, ResilienceLayer};

/// Environment variable holding the token-signing master secret.
pub const TOKEN_SECRET_ENV: &str = "PRACTICUM_TOKEN_SECRET";

/// Environment variable holding an optional GitHub API token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Errors wiring a pipeline together. These are startup failures; once a
/// dispatcher exists, verification never returns an error, only verdicts.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("token verifier: {0}")]
    Token(#[from] ConfigError),

    #[error("llm provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Routes submissions to verifiers and normalizes their outcomes.
///
/// Holds every collaborator behind its seam (token verifier, code host,
/// evidence collector, grading engine) so tests can script each one. One
/// dispatcher serves all learners; it keeps no per-submission state.
pub struct Dispatcher {
    tokens: TokenVerifier,
    host: Arc<dyn CodeHost>,
    evidence: EvidenceCollector,
    grader: Grader,
    resilience: Arc<ResilienceLayer>,
    probe: reqwest::Client,
    probe_timeout: Duration,
}

impl Dispatcher {
    /// Assemble a dispatcher from explicit parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokens: TokenVerifier,
        host: Arc<dyn CodeHost>,
        evidence: EvidenceCollector,
        grader: Grader,
        resilience: Arc<ResilienceLayer>,
        probe: reqwest::Client,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            host,
            evidence,
            grader,
            resilience,
            probe,
            probe_timeout,
        }
    }

    /// Wire a complete pipeline from configuration plus credentials in the
    /// environment.
    ///
    /// Reads `ANTHROPIC_API_KEY` (required), `GITHUB_TOKEN` (optional) and
    /// `PRACTICUM_TOKEN_SECRET` (optional; the development placeholder is
    /// used when unset, which [`TokenVerifier::new`] refuses outside
    /// development). A single HTTP client is shared by the GitHub client,
    /// the LLM provider and the deployment probe.
    pub fn from_env(config: &PipelineConfig) -> Result<Self, SetupError> {
        let client = reqwest::Client::builder()
            .user_agent(config.github.user_agent.clone())
            .build()?;

        let resilience = Arc::new(ResilienceLayer::new(
            config.circuit_breaker.clone(),
            config.retry.clone(),
            config.cooldown.clone(),
        ));

        let github_token = Credential::optional(GITHUB_TOKEN_ENV, "GitHub token");
        if github_token.is_none() {
            info!("no GITHUB_TOKEN set; GitHub calls run at unauthenticated rate limits");
        }
        let host: Arc<dyn CodeHost> = Arc::new(GithubClient::new(
            client.clone(),
            config.github.clone(),
            github_token,
            Arc::clone(&resilience),
        ));

        let provider: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::from_env(client.clone())?);
        let grader = Grader::new(provider, Arc::clone(&resilience), config.grader.clone());
        let evidence = EvidenceCollector::new(
            Arc::clone(&host),
            config.grader.max_evidence_files,
            config.grader.max_file_chars,
        );

        let master_secret = std::env::var(TOKEN_SECRET_ENV)
            .unwrap_or_else(|_| PLACEHOLDER_SECRET.to_string());
        let tokens = TokenVerifier::new(TokenConfig {
            master_secret: SecretString::from(master_secret),
            environment: config.environment,
        })?;

        Ok(Self::new(
            tokens,
            host,
            evidence,
            grader,
            resilience,
            client,
            config.github.request_timeout,
        ))
    }

    /// Verify one submission against its requirement.
    ///
    /// Always returns a verdict. Infrastructure failures become the
    /// standard unavailable verdict (`server_error` set) rather than an
    /// error, so callers have exactly one outcome type to persist.
    pub async fn verify_submission(
        &self,
        submission: &Submission,
        requirement: &Requirement,
    ) -> Verdict {
        let owner = submission
            .expected_owner
            .as_deref()
            .map(str::trim)
            .filter(|owner| !owner.is_empty());

        if submission.kind.requires_identity() && owner.is_none() {
            info!(
                kind = ?submission.kind,
                requirement = %requirement.id,
                "rejecting submission with no linked identity"
            );
            return Verdict::fail("Link your GitHub account before submitting evidence.");
        }
        // Only Deployment reaches this point without an owner, and it
        // never reads one.
        let owner = owner.unwrap_or_default();

        let outcome = match submission.kind {
            SubmissionKind::ChallengeToken => Ok(self.tokens.verify_challenge_token(
                &submission.value,
                owner,
                requirement.required_count,
            )),
            SubmissionKind::NetworkLabToken => Ok(self.tokens.verify_network_token(
                &submission.value,
                owner,
                requirement.required_count,
            )),
            SubmissionKind::Profile => self.verify_profile(&submission.value, owner).await,
            SubmissionKind::Fork => self.verify_fork(&submission.value, requirement, owner).await,
            SubmissionKind::PullRequest => {
                self.verify_pull_request(&submission.value, requirement, owner)
                    .await
            }
            SubmissionKind::RepoAnalysis => {
                self.verify_analysis(&submission.value, requirement, owner, GradingFocus::Code)
                    .await
            }
            SubmissionKind::DevopsAnalysis => {
                self.verify_analysis(&submission.value, requirement, owner, GradingFocus::Devops)
                    .await
            }
            SubmissionKind::SecurityPosture => {
                self.verify_analysis(&submission.value, requirement, owner, GradingFocus::Security)
                    .await
            }
            SubmissionKind::Deployment => self.verify_deployment(&submission.value).await,
        };

        match outcome {
            Ok(verdict) => {
                info!(
                    kind = ?submission.kind,
                    requirement = %requirement.id,
                    valid = verdict.is_valid,
                    "verification completed"
                );
                verdict
            }
            Err(error) => {
                warn!(
                    kind = ?submission.kind,
                    requirement = %requirement.id,
                    error = %error,
                    "verification dependency failed"
                );
                Verdict::unavailable()
            }
        }
    }

    /// Whether the grading provider answers its health endpoint.
    pub async fn health_check(&self) -> bool {
        self.grader.health_check().await
    }

    async fn verify_profile(
        &self,
        value: &str,
        expected_owner: &str,
    ) -> Result<Verdict, CallError> {
        let username = match parse_profile(value) {
            Ok(username) => username,
            Err(error) => return Ok(Verdict::fail(error.to_string())),
        };
        if let Err(verdict) = check_ownership(&username, expected_owner) {
            return Ok(verdict);
        }

        if self.host.profile_exists(&username).await? {
            Ok(Verdict::pass(format!("GitHub profile '{}' verified.", username)).with_owner_match())
        } else {
            Ok(
                Verdict::fail(format!("GitHub profile '{}' was not found.", username))
                    .with_owner_match(),
            )
        }
    }

    async fn verify_fork(
        &self,
        value: &str,
        requirement: &Requirement,
        expected_owner: &str,
    ) -> Result<Verdict, CallError> {
        let repo = match parse_repo_url(value) {
            Ok(repo) => repo,
            Err(error) => return Ok(Verdict::fail(error.to_string())),
        };
        if let Err(verdict) = check_ownership(&repo.owner, expected_owner) {
            return Ok(verdict);
        }
        if let Some(expected_repo) = &requirement.expected_repo {
            if !repo.repo.eq_ignore_ascii_case(expected_repo) {
                return Ok(Verdict::fail(format!(
                    "This requirement expects repository '{}', but the URL points at '{}'.",
                    expected_repo, repo.repo
                ))
                .with_owner_match());
            }
        }

        if !self.host.repo_exists(&repo.owner, &repo.repo).await? {
            return Ok(Verdict::fail(format!(
                "Repository '{}/{}' was not found.",
                repo.owner, repo.repo
            ))
            .with_owner_match());
        }

        match &requirement.expected_upstream {
            Some(upstream) => {
                if self
                    .host
                    .repo_is_fork_of(&repo.owner, &repo.repo, upstream)
                    .await?
                {
                    Ok(Verdict::pass(format!(
                        "Fork '{}/{}' of '{}' verified.",
                        repo.owner, repo.repo, upstream
                    ))
                    .with_owner_match())
                } else {
                    Ok(Verdict::fail(format!(
                        "Repository '{}/{}' is not a fork of '{}'.",
                        repo.owner, repo.repo, upstream
                    ))
                    .with_owner_match())
                }
            }
            None => Ok(Verdict::pass(format!(
                "Repository '{}/{}' verified.",
                repo.owner, repo.repo
            ))
            .with_owner_match()),
        }
    }

    async fn verify_pull_request(
        &self,
        value: &str,
        requirement: &Requirement,
        expected_owner: &str,
    ) -> Result<Verdict, CallError> {
        let pull = match parse_pull_url(value) {
            Ok(pull) => pull,
            Err(error) => return Ok(Verdict::fail(error.to_string())),
        };
        if let Err(verdict) = check_ownership(&pull.owner, expected_owner) {
            return Ok(verdict);
        }

        let Some(meta) = self
            .host
            .pr_metadata(&pull.owner, &pull.repo, pull.number)
            .await?
        else {
            return Ok(Verdict::fail(format!(
                "PR #{} was not found in '{}/{}'.",
                pull.number, pull.owner, pull.repo
            ))
            .with_owner_match());
        };

        if !meta.merged {
            return Ok(Verdict::fail(format!(
                "PR #{} is not merged (state: {}).",
                pull.number, meta.state
            ))
            .with_owner_match());
        }

        if !requirement.expected_files.is_empty() {
            let changed = self
                .host
                .pr_changed_files(&pull.owner, &pull.repo, pull.number)
                .await?;
            let touched = changed
                .iter()
                .any(|file| requirement.expected_files.contains(file));
            if !touched {
                return Ok(Verdict::fail(format!(
                    "PR #{} does not modify any of the expected files: {}.",
                    pull.number,
                    requirement.expected_files.join(", ")
                ))
                .with_owner_match());
            }
        }

        Ok(Verdict::pass(format!(
            "PR #{} in '{}/{}' is merged.",
            pull.number, pull.owner, pull.repo
        ))
        .with_owner_match())
    }

    async fn verify_analysis(
        &self,
        value: &str,
        requirement: &Requirement,
        expected_owner: &str,
        focus: GradingFocus,
    ) -> Result<Verdict, CallError> {
        let repo = match parse_repo_url(value) {
            Ok(repo) => repo,
            Err(error) => return Ok(Verdict::fail(error.to_string())),
        };
        if let Err(verdict) = check_ownership(&repo.owner, expected_owner) {
            return Ok(verdict);
        }
        if !self.host.repo_exists(&repo.owner, &repo.repo).await? {
            return Ok(Verdict::fail(format!(
                "Repository '{}/{}' was not found.",
                repo.owner, repo.repo
            ))
            .with_owner_match());
        }

        let evidence = self.evidence.collect(&repo.owner, &repo.repo).await?;
        if evidence.is_empty() {
            return Ok(Verdict::fail(format!(
                "Repository '{}/{}' appears to be empty; there is nothing to review.",
                repo.owner, repo.repo
            ))
            .with_owner_match());
        }

        if !requirement.tasks.is_empty() {
            let results = self
                .grader
                .analyze(&evidence, &requirement.tasks, focus, expected_owner)
                .await?;
            let passed = results.iter().filter(|result| result.passed).count();
            let total = results.len();
            let verdict = if passed == total {
                Verdict::pass(format!("All {} tasks verified.", total))
            } else {
                Verdict::fail(format!(
                    "{}/{} tasks passed. Review the task feedback and resubmit.",
                    passed, total
                ))
            };
            return Ok(verdict.with_owner_match().with_tasks(results));
        }

        if let Some(rubric) = &requirement.rubric {
            let grade = self
                .grader
                .grade(&evidence.flattened(), rubric, expected_owner)
                .await?;
            let verdict = if grade.passed {
                Verdict::pass(grade.feedback)
            } else {
                Verdict::fail(grade.feedback)
            };
            return Ok(verdict.with_owner_match());
        }

        // A requirement with neither tasks nor a rubric is a curriculum
        // authoring mistake, not a learner one.
        warn!(
            requirement = %requirement.id,
            "analysis requirement defines no tasks and no rubric"
        );
        Ok(Verdict::fail(
            "This requirement has no grading criteria configured; contact course staff.",
        ))
    }

    async fn verify_deployment(&self, value: &str) -> Result<Verdict, CallError> {
        let url = value.trim();
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Ok(Verdict::fail(
                "Deployment URL must start with http:// or https://.",
            ));
        }

        let status = self
            .resilience
            .call("deployment", None, || async {
                let response = self
                    .probe
                    .get(url)
                    .timeout(self.probe_timeout)
                    .send()
                    .await
                    .map_err(|error| {
                        if error.is_timeout() {
                            CallError::Timeout(self.probe_timeout)
                        } else {
                            CallError::Transport(error.to_string())
                        }
                    })?;
                // Any HTTP status is an answer from the deployment; only
                // failing to get one counts against the circuit.
                Ok(response.status().as_u16())
            })
            .await?;

        if (200..300).contains(&status) {
            Ok(Verdict::pass(format!(
                "Deployment is reachable (HTTP {}).",
                status
            )))
        } else {
            Ok(Verdict::fail(format!(
                "Deployment responded with HTTP {}, expected a success status.",
                status
            )))
        }
    }
}
