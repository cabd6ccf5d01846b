//! GitHub URL normalization and ownership checks.
//!
//! Learners hand us URLs in every shape: with or without a scheme, with
//! `www.`, with a trailing slash or `.git`, pointing at a repo root, a
//! `blob`/`tree` path, or a pull request. Everything is normalized to a
//! [`RepoRef`] or [`PullRef`] before any network call, and ownership is
//! always compared against the learner's verified identity, never against
//! anything inside the submitted URL alone.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::types::Verdict;

lazy_static! {
    /// GitHub username shape: 1-39 alphanumeric-or-hyphen characters,
    /// no leading or trailing hyphen.
    static ref OWNER_RE: Regex =
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,37}[A-Za-z0-9])?$").unwrap();
}

/// A parsed repository reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,

    /// Path within the repository when the URL carried a `blob`/`tree`
    /// segment pointing past the ref.
    pub file_path: Option<String>,
}

/// A parsed pull-request reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

/// Why a submitted URL could not be normalized.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("only github.com URLs are accepted")]
    WrongHost,

    #[error("URL must include both an owner and a repository")]
    MissingSegments,

    #[error("'{0}' is not a valid GitHub username")]
    InvalidOwner(String),

    #[error("URL is not a pull request (expected .../pull/<number>)")]
    NotAPullRequest,

    #[error("value is not a user profile (expected a username or github.com/<username>)")]
    NotAProfile,
}

/// Parse a profile submission into a username.
///
/// Accepts either a bare username or a profile URL (`github.com/<owner>`,
/// scheme and `www.` optional). A repository URL is not a profile.
pub fn parse_profile(value: &str) -> Result<String, OwnershipError> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(OwnershipError::NotAProfile);
    }

    // Bare usernames never contain slashes or dots; anything else is
    // treated as a URL.
    if !trimmed.contains('/') && !trimmed.contains('.') {
        return if OWNER_RE.is_match(trimmed) {
            Ok(trimmed.to_string())
        } else {
            Err(OwnershipError::InvalidOwner(trimmed.to_string()))
        };
    }

    let segments = host_path_segments(value)?;
    match segments.as_slice() {
        [owner] if OWNER_RE.is_match(owner) => Ok((*owner).to_string()),
        [owner] => Err(OwnershipError::InvalidOwner((*owner).to_string())),
        _ => Err(OwnershipError::NotAProfile),
    }
}

/// Parse a repository URL into owner, repository, and optional file path.
///
/// Accepts `github.com` with or without a scheme and with or without
/// `www.`; strips a trailing slash and a `.git` suffix on the repository
/// segment. A `blob` or `tree` segment introduces a ref; the segments after
/// the ref, if any, form the file path. Trailing segments that are neither
/// are ignored.
pub fn parse_repo_url(url: &str) -> Result<RepoRef, OwnershipError> {
    let segments = host_path_segments(url)?;
    if segments.len() < 2 {
        return Err(OwnershipError::MissingSegments);
    }

    let owner = segments[0];
    if !OWNER_RE.is_match(owner) {
        return Err(OwnershipError::InvalidOwner(owner.to_string()));
    }

    let repo = segments[1].trim_end_matches(".git");
    if repo.is_empty() {
        return Err(OwnershipError::MissingSegments);
    }

    // `/blob/<ref>/<path...>` and `/tree/<ref>/<path...>`: the ref segment
    // itself is not part of the file path.
    let file_path = match segments.get(2) {
        Some(&"blob") | Some(&"tree") if segments.len() > 4 => Some(segments[4..].join("/")),
        _ => None,
    };

    Ok(RepoRef {
        owner: owner.to_string(),
        repo: repo.to_string(),
        file_path,
    })
}

/// Parse a pull-request URL (`<owner>/<repo>/pull/<number>`).
pub fn parse_pull_url(url: &str) -> Result<PullRef, OwnershipError> {
    let repo_ref = parse_repo_url(url)?;
    let segments = host_path_segments(url)?;

    let number = match (segments.get(2), segments.get(3)) {
        (Some(&"pull"), Some(number)) => number
            .parse::<u64>()
            .map_err(|_| OwnershipError::NotAPullRequest)?,
        _ => return Err(OwnershipError::NotAPullRequest),
    };

    Ok(PullRef {
        owner: repo_ref.owner,
        repo: repo_ref.repo,
        number,
    })
}

/// Compare a resource owner against the learner's verified identity.
///
/// Case-insensitive. On mismatch the returned verdict names both
/// identities so the learner can see exactly what we compared.
pub fn check_ownership(owner: &str, expected: &str) -> Result<(), Verdict> {
    if owner.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Verdict::owner_mismatch(owner, expected))
    }
}

/// Strip scheme/host and return the non-empty path segments, rejecting
/// hosts other than github.com.
fn host_path_segments(url: &str) -> Result<Vec<&str>, OwnershipError> {
    let trimmed = url.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);

    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    if !host.eq_ignore_ascii_case("github.com") {
        return Err(OwnershipError::WrongHost);
    }

    Ok(path.split('/').filter(|s| !s.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_repo_url() {
        let parsed = parse_repo_url("https://github.com/alice/my-repo").unwrap();
        assert_eq!(parsed.owner, "alice");
        assert_eq!(parsed.repo, "my-repo");
        assert!(parsed.file_path.is_none());
    }

    #[test]
    fn test_parse_tolerates_scheme_www_slash_git() {
        for url in [
            "github.com/alice/repo",
            "http://github.com/alice/repo",
            "https://www.github.com/alice/repo",
            "https://github.com/alice/repo/",
            "https://github.com/alice/repo.git",
            "  https://github.com/alice/repo.git/  ",
        ] {
            let parsed = parse_repo_url(url).unwrap();
            assert_eq!(parsed.owner, "alice", "url: {url}");
            assert_eq!(parsed.repo, "repo", "url: {url}");
        }
    }

    #[test]
    fn test_parse_rejects_other_hosts() {
        for url in [
            "https://gitlab.com/alice/repo",
            "https://github.com.evil.example/alice/repo",
            "https://bitbucket.org/alice/repo",
        ] {
            assert_eq!(parse_repo_url(url), Err(OwnershipError::WrongHost), "url: {url}");
        }
    }

    #[test]
    fn test_parse_requires_two_segments() {
        assert_eq!(
            parse_repo_url("https://github.com/alice"),
            Err(OwnershipError::MissingSegments)
        );
        assert_eq!(
            parse_repo_url("https://github.com/"),
            Err(OwnershipError::MissingSegments)
        );
    }

    #[test]
    fn test_parse_validates_owner_shape() {
        assert!(matches!(
            parse_repo_url("https://github.com/-alice/repo"),
            Err(OwnershipError::InvalidOwner(_))
        ));
        assert!(matches!(
            parse_repo_url("https://github.com/alice-/repo"),
            Err(OwnershipError::InvalidOwner(_))
        ));
        assert!(matches!(
            parse_repo_url("https://github.com/al_ice/repo"),
            Err(OwnershipError::InvalidOwner(_))
        ));

        // Lengths 1 and 39 are the boundaries.
        assert!(parse_repo_url("https://github.com/a/repo").is_ok());
        let owner_39 = "a".repeat(39);
        assert!(parse_repo_url(&format!("https://github.com/{owner_39}/repo")).is_ok());
        let owner_40 = "a".repeat(40);
        assert!(matches!(
            parse_repo_url(&format!("https://github.com/{owner_40}/repo")),
            Err(OwnershipError::InvalidOwner(_))
        ));
    }

    #[test]
    fn test_blob_path_skips_ref_segment() {
        let parsed =
            parse_repo_url("https://github.com/alice/repo/blob/main/src/app.py").unwrap();
        assert_eq!(parsed.file_path.as_deref(), Some("src/app.py"));

        let parsed =
            parse_repo_url("https://github.com/alice/repo/tree/feature-x/docs/guide").unwrap();
        assert_eq!(parsed.file_path.as_deref(), Some("docs/guide"));
    }

    #[test]
    fn test_blob_without_path_yields_none() {
        let parsed = parse_repo_url("https://github.com/alice/repo/tree/main").unwrap();
        assert!(parsed.file_path.is_none());
    }

    #[test]
    fn test_parse_pull_url() {
        let parsed = parse_pull_url("https://github.com/alice/repo/pull/7").unwrap();
        assert_eq!(parsed.owner, "alice");
        assert_eq!(parsed.repo, "repo");
        assert_eq!(parsed.number, 7);
    }

    #[test]
    fn test_parse_pull_url_rejects_non_pr_paths() {
        for url in [
            "https://github.com/alice/repo",
            "https://github.com/alice/repo/pulls/7",
            "https://github.com/alice/repo/pull/seven",
            "https://github.com/alice/repo/issues/7",
        ] {
            assert_eq!(parse_pull_url(url), Err(OwnershipError::NotAPullRequest), "url: {url}");
        }
    }

    #[test]
    fn test_parse_profile_bare_username() {
        assert_eq!(parse_profile("alice").unwrap(), "alice");
        assert_eq!(parse_profile("  a-b-c  ").unwrap(), "a-b-c");
        assert!(matches!(
            parse_profile("-alice"),
            Err(OwnershipError::InvalidOwner(_))
        ));
    }

    #[test]
    fn test_parse_profile_url_forms() {
        for url in [
            "https://github.com/alice",
            "github.com/alice",
            "https://www.github.com/alice/",
        ] {
            assert_eq!(parse_profile(url).unwrap(), "alice", "url: {url}");
        }
    }

    #[test]
    fn test_parse_profile_rejects_repos_and_other_hosts() {
        assert_eq!(
            parse_profile("https://github.com/alice/repo"),
            Err(OwnershipError::NotAProfile)
        );
        assert_eq!(
            parse_profile("https://gitlab.com/alice"),
            Err(OwnershipError::WrongHost)
        );
        assert_eq!(parse_profile("   "), Err(OwnershipError::NotAProfile));
    }

    #[test]
    fn test_check_ownership_case_insensitive() {
        assert!(check_ownership("Alice", "alice").is_ok());
        assert!(check_ownership("ALICE", "alice").is_ok());
        assert!(check_ownership("alice", "alice").is_ok());
    }

    #[test]
    fn test_check_ownership_mismatch_verdict() {
        let verdict = check_ownership("bob", "alice").unwrap_err();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.owner_match, Some(false));
        assert!(verdict.message.contains("'bob'"));
        assert!(verdict.message.contains("'alice'"));
    }
}
