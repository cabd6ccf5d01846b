//! Core data model for evidence verification.
//!
//! A [`Submission`] pairs a learner-supplied value (token, URL) with the
//! [`Requirement`] it claims to satisfy. Every verification path, no matter
//! which verifier handled it, produces the same [`Verdict`] shape.

use serde::{Deserialize, Serialize};

/// Deployment environment for the verification pipeline.
///
/// Gates whether a placeholder signing secret is tolerated: outside
/// `Development`, constructing a verifier with the placeholder secret is a
/// fatal configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Whether this is a development deployment.
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// The kind of evidence a learner submitted.
///
/// A closed enum rather than a string key: adding a kind forces every
/// dispatcher match to be revisited at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    /// Signed completion token from the CLI challenge track.
    ChallengeToken,
    /// Signed completion token from the multi-provider networking labs.
    NetworkLabToken,
    /// A GitHub profile the learner claims as their own.
    Profile,
    /// A fork of a course upstream repository.
    Fork,
    /// A pull request that must be merged and touch expected files.
    PullRequest,
    /// LLM review of a project repository's code.
    RepoAnalysis,
    /// LLM review of a repository's CI/CD and automation setup.
    DevopsAnalysis,
    /// LLM review of a repository's security posture.
    SecurityPosture,
    /// Reachability probe of a learner-deployed service URL.
    Deployment,
}

impl SubmissionKind {
    /// Whether verifying this kind requires an established learner identity.
    ///
    /// Deployment probes check a public URL and are the only kind that can
    /// be verified without knowing who the learner is.
    pub fn requires_identity(&self) -> bool {
        match self {
            SubmissionKind::ChallengeToken
            | SubmissionKind::NetworkLabToken
            | SubmissionKind::Profile
            | SubmissionKind::Fork
            | SubmissionKind::PullRequest
            | SubmissionKind::RepoAnalysis
            | SubmissionKind::DevopsAnalysis
            | SubmissionKind::SecurityPosture => true,
            SubmissionKind::Deployment => false,
        }
    }
}

/// A learner's proof of work for one requirement.
///
/// Immutable per verification attempt; the dispatcher never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// What kind of evidence this is.
    pub kind: SubmissionKind,

    /// The submitted value: a signed token, a repository URL, a PR URL,
    /// or a deployment URL, depending on `kind`.
    pub value: String,

    /// Identifier of the requirement being satisfied.
    pub requirement_id: String,

    /// The learner's verified hosting-provider identity, if established.
    pub expected_owner: Option<String>,
}

/// One gradable task inside a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Stable task identifier (e.g. "http-api", "dockerfile").
    pub id: String,

    /// What a passing solution must demonstrate.
    pub description: String,
}

/// Definition of a curriculum requirement, as stored by the course.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirement {
    /// Stable requirement identifier.
    pub id: String,

    /// Required completed-unit count for token kinds. `None` uses the
    /// per-kind default.
    #[serde(default)]
    pub required_count: Option<u32>,

    /// Repository name the submission must point at, if fixed.
    #[serde(default)]
    pub expected_repo: Option<String>,

    /// Upstream `owner/repo` a fork must descend from.
    #[serde(default)]
    pub expected_upstream: Option<String>,

    /// Files a pull request must touch (any one suffices).
    #[serde(default)]
    pub expected_files: Vec<String>,

    /// Tasks evaluated by the grading engine for analysis kinds.
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,

    /// Free-form rubric text handed to the grader.
    #[serde(default)]
    pub rubric: Option<String>,
}

/// Outcome of grading one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task identifier this result belongs to.
    pub task: String,

    /// Whether the task passed.
    pub passed: bool,

    /// Sanitized, user-facing feedback.
    pub feedback: String,
}

impl TaskResult {
    /// A failed result for a task the grader never evaluated.
    pub fn not_evaluated(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            passed: false,
            feedback: "not evaluated".to_string(),
        }
    }
}

/// User-facing message for transient infrastructure failures.
pub const TEMPORARILY_UNAVAILABLE: &str =
    "Verification is temporarily unavailable. Please try again in a few minutes.";

/// The unified outcome of a verification attempt.
///
/// Produced fresh per call and never mutated after return. When
/// `task_results` is non-empty it covers every task the requirement
/// defines; the grading engine fills unevaluated tasks explicitly rather
/// than omitting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the evidence satisfied the requirement.
    pub is_valid: bool,

    /// Human-readable explanation of the outcome.
    pub message: String,

    /// Ownership comparison outcome, when one was performed.
    pub owner_match: Option<bool>,

    /// True when the failure was ours (or a dependency's), not the
    /// learner's. "Try again later" semantics.
    pub server_error: bool,

    /// Per-task breakdown for graded requirements, empty otherwise.
    #[serde(default)]
    pub task_results: Vec<TaskResult>,
}

impl Verdict {
    /// A passing verdict.
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            message: message.into(),
            owner_match: None,
            server_error: false,
            task_results: Vec::new(),
        }
    }

    /// A failing verdict attributable to the submission itself.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
            owner_match: None,
            server_error: false,
            task_results: Vec::new(),
        }
    }

    /// A failing verdict caused by infrastructure, not the learner.
    pub fn unavailable() -> Self {
        Self {
            is_valid: false,
            message: TEMPORARILY_UNAVAILABLE.to_string(),
            owner_match: None,
            server_error: true,
            task_results: Vec::new(),
        }
    }

    /// An ownership-mismatch verdict naming both identities.
    pub fn owner_mismatch(found: &str, expected: &str) -> Self {
        Self {
            is_valid: false,
            message: format!(
                "This evidence belongs to '{}' but your linked account is '{}'.",
                found, expected
            ),
            owner_match: Some(false),
            server_error: false,
            task_results: Vec::new(),
        }
    }

    /// Mark the ownership comparison as performed and matching.
    pub fn with_owner_match(mut self) -> Self {
        self.owner_match = Some(true);
        self
    }

    /// Attach a per-task breakdown.
    pub fn with_tasks(mut self, tasks: Vec<TaskResult>) -> Self {
        self.task_results = tasks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_pass() {
        let v = Verdict::pass("All 18 challenges complete");
        assert!(v.is_valid);
        assert!(!v.server_error);
        assert!(v.owner_match.is_none());
        assert!(v.task_results.is_empty());
    }

    #[test]
    fn test_verdict_unavailable_is_server_error() {
        let v = Verdict::unavailable();
        assert!(!v.is_valid);
        assert!(v.server_error);
        assert!(v.message.contains("temporarily unavailable"));
    }

    #[test]
    fn test_owner_mismatch_names_both_identities() {
        let v = Verdict::owner_mismatch("bob", "alice");
        assert!(!v.is_valid);
        assert_eq!(v.owner_match, Some(false));
        assert!(v.message.contains("bob"));
        assert!(v.message.contains("alice"));
    }

    #[test]
    fn test_deployment_is_only_identity_free_kind() {
        assert!(!SubmissionKind::Deployment.requires_identity());
        for kind in [
            SubmissionKind::ChallengeToken,
            SubmissionKind::NetworkLabToken,
            SubmissionKind::Profile,
            SubmissionKind::Fork,
            SubmissionKind::PullRequest,
            SubmissionKind::RepoAnalysis,
            SubmissionKind::DevopsAnalysis,
            SubmissionKind::SecurityPosture,
        ] {
            assert!(kind.requires_identity(), "{:?} should require identity", kind);
        }
    }

    #[test]
    fn test_submission_kind_serde_round_trip() {
        let json = serde_json::to_string(&SubmissionKind::PullRequest).unwrap();
        assert_eq!(json, "\"pull_request\"");
        let back: SubmissionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SubmissionKind::PullRequest);
    }

    #[test]
    fn test_requirement_deserializes_with_defaults() {
        let req: Requirement = serde_json::from_str(r#"{"id": "http-servers"}"#).unwrap();
        assert_eq!(req.id, "http-servers");
        assert!(req.required_count.is_none());
        assert!(req.expected_files.is_empty());
        assert!(req.tasks.is_empty());
    }
}
