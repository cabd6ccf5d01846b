//! GitHub evidence-source client.
//!
//! A thin, resilience-wrapped client for the handful of GitHub REST reads the
//! pipeline needs: profile existence, repository existence and fork lineage,
//! pull-request state and changed files, the recursive file tree, and raw
//! file content.
//!
//! Every operation runs under its own circuit name through the shared
//! [`ResilienceLayer`], with the repository owner as the cooldown key. A 404
//! is a definitive negative (`false` / `None` / empty) and is never retried;
//! only transport failures, 5xx answers, timeouts, and 429s are.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::providers::credentials::Credential;
use crate::resilience::{CallError, ResilienceLayer};

/// Settings for the GitHub client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// REST API base URL.
    pub api_base: String,

    /// Raw-content base URL.
    pub raw_base: String,

    /// Per-request timeout.
    #[serde(with = "crate::config::duration_secs")]
    pub request_timeout: Duration,

    /// User-Agent header value. GitHub rejects requests without one.
    pub user_agent: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
            request_timeout: Duration::from_secs(10),
            user_agent: "practicum-verifier".to_string(),
        }
    }
}

/// The pull-request facts the dispatcher cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullMetadata {
    /// Whether the PR has been merged.
    pub merged: bool,

    /// PR state as reported by the API ("open" or "closed").
    pub state: String,

    /// Name of the branch the PR was opened from.
    pub head_branch: String,

    /// PR title.
    pub title: String,
}

/// Read-only view of a code-hosting service.
///
/// The dispatcher and evidence collector depend on this trait rather than on
/// [`GithubClient`] directly, so tests can script responses without network.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Whether a user profile exists.
    async fn profile_exists(&self, owner: &str) -> Result<bool, CallError>;

    /// Whether a repository exists (and is visible to us).
    async fn repo_exists(&self, owner: &str, repo: &str) -> Result<bool, CallError>;

    /// Whether `owner/repo` is a fork of `expected_upstream`
    /// (`"upstream-owner/name"`, compared case-insensitively).
    async fn repo_is_fork_of(
        &self,
        owner: &str,
        repo: &str,
        expected_upstream: &str,
    ) -> Result<bool, CallError>;

    /// Metadata for one pull request, or `None` if it does not exist.
    async fn pr_metadata(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<PullMetadata>, CallError>;

    /// Paths changed by a pull request. Single page, capped at 100 files.
    async fn pr_changed_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<String>, CallError>;

    /// Recursive blob paths of the default branch (`main`, then `master`).
    /// A repository with neither branch yields an empty tree.
    async fn repo_file_tree(&self, owner: &str, repo: &str) -> Result<Vec<String>, CallError>;

    /// Raw content of one file on one branch, or `None` if missing.
    async fn raw_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>, CallError>;
}

// ---- GitHub wire formats (only the fields we read) ----

#[derive(Debug, Deserialize)]
struct UserResponse {
    #[allow(dead_code)] // Confirms the payload shape; existence is the signal
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    #[serde(default)]
    fork: bool,
    parent: Option<RepoParent>,
}

#[derive(Debug, Deserialize)]
struct RepoParent {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    merged: bool,
    state: String,
    title: String,
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    #[serde(rename = "ref")]
    branch: String,
}

impl From<PullResponse> for PullMetadata {
    fn from(raw: PullResponse) -> Self {
        Self {
            merged: raw.merged,
            state: raw.state,
            head_branch: raw.head.branch,
            title: raw.title,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

/// Resilience-wrapped GitHub REST client.
pub struct GithubClient {
    client: reqwest::Client,
    config: GithubConfig,
    token: Option<Credential>,
    resilience: Arc<ResilienceLayer>,
}

impl GithubClient {
    /// Create a client over a shared HTTP client and resilience layer.
    ///
    /// `token` is optional; without it requests run unauthenticated at
    /// GitHub's lower rate limits.
    pub fn new(
        client: reqwest::Client,
        config: GithubConfig,
        token: Option<Credential>,
        resilience: Arc<ResilienceLayer>,
    ) -> Self {
        Self {
            client,
            config,
            token,
            resilience,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", &self.config.user_agent)
            .timeout(self.config.request_timeout);
        if let Some(token) = &self.token {
            // The token leaves the Credential only here.
            request = request.bearer_auth(token.reveal());
        }
        request
    }

    /// One GET, classified into the [`CallError`] taxonomy.
    /// 404 is `Ok(None)`; the resilience layer never sees it as a failure.
    async fn get_json_once<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, CallError> {
        let response = self.request(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Timeout(self.config.request_timeout)
            } else {
                CallError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(response.headers());
            return Err(CallError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(CallError::Transport(format!("GitHub returned {}", status)));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CallError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let value = response
            .json::<T>()
            .await
            .map_err(|e| CallError::Transport(format!("unreadable GitHub response: {}", e)))?;
        Ok(Some(value))
    }

    /// Like [`Self::get_json_once`] but returns the body as text.
    async fn get_text_once(&self, url: &str) -> Result<Option<String>, CallError> {
        let response = self.request(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Timeout(self.config.request_timeout)
            } else {
                CallError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(response.headers());
            return Err(CallError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(CallError::Transport(format!("GitHub returned {}", status)));
        }
        if !status.is_success() {
            return Err(CallError::Rejected {
                status: status.as_u16(),
                message: format!("unexpected status {}", status),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| CallError::Transport(format!("unreadable GitHub response: {}", e)))?;
        Ok(Some(text))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl CodeHost for GithubClient {
    async fn profile_exists(&self, owner: &str) -> Result<bool, CallError> {
        let url = format!("{}/users/{}", self.config.api_base, owner);
        let user = self
            .resilience
            .call("github:profile", Some(owner), || {
                self.get_json_once::<UserResponse>(&url)
            })
            .await?;
        Ok(user.is_some())
    }

    async fn repo_exists(&self, owner: &str, repo: &str) -> Result<bool, CallError> {
        let url = format!("{}/repos/{}/{}", self.config.api_base, owner, repo);
        let found = self
            .resilience
            .call("github:repo", Some(owner), || {
                self.get_json_once::<RepoResponse>(&url)
            })
            .await?;
        Ok(found.is_some())
    }

    async fn repo_is_fork_of(
        &self,
        owner: &str,
        repo: &str,
        expected_upstream: &str,
    ) -> Result<bool, CallError> {
        let url = format!("{}/repos/{}/{}", self.config.api_base, owner, repo);
        let found = self
            .resilience
            .call("github:fork", Some(owner), || {
                self.get_json_once::<RepoResponse>(&url)
            })
            .await?;

        let Some(repo) = found else {
            return Ok(false);
        };
        if !repo.fork {
            return Ok(false);
        }
        Ok(repo
            .parent
            .map(|parent| parent.full_name.eq_ignore_ascii_case(expected_upstream))
            .unwrap_or(false))
    }

    async fn pr_metadata(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<PullMetadata>, CallError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.config.api_base, owner, repo, number
        );
        let pull = self
            .resilience
            .call("github:pull", Some(owner), || {
                self.get_json_once::<PullResponse>(&url)
            })
            .await?;
        Ok(pull.map(PullMetadata::from))
    }

    async fn pr_changed_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<String>, CallError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/files?per_page=100",
            self.config.api_base, owner, repo, number
        );
        let files = self
            .resilience
            .call("github:pull_files", Some(owner), || {
                self.get_json_once::<Vec<ChangedFile>>(&url)
            })
            .await?;
        Ok(files
            .unwrap_or_default()
            .into_iter()
            .map(|f| f.filename)
            .collect())
    }

    async fn repo_file_tree(&self, owner: &str, repo: &str) -> Result<Vec<String>, CallError> {
        let tree = self
            .resilience
            .call("github:tree", Some(owner), || async {
                for branch in ["main", "master"] {
                    let url = format!(
                        "{}/repos/{}/{}/git/trees/{}?recursive=1",
                        self.config.api_base, owner, repo, branch
                    );
                    if let Some(tree) = self.get_json_once::<TreeResponse>(&url).await? {
                        return Ok(Some(tree));
                    }
                    debug!(owner, repo, branch, "branch not found, trying fallback");
                }
                Ok(None)
            })
            .await?;

        let Some(tree) = tree else {
            return Ok(Vec::new());
        };
        if tree.truncated {
            warn!(owner, repo, "file tree truncated by GitHub; evidence may be partial");
        }
        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.entry_type == "blob")
            .map(|entry| entry.path)
            .collect())
    }

    async fn raw_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>, CallError> {
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.config.raw_base, owner, repo, branch, path
        );
        self.resilience
            .call("github:raw", Some(owner), || self.get_text_once(&url))
            .await
    }
}
