//! Evidence collection for repository analysis.
//!
//! Before the grading engine can judge a repository, the pipeline gathers a
//! bounded snapshot of it: the file tree plus the contents of a handful of
//! relevantly-named files (README, entrypoints, Dockerfiles, CI workflows,
//! dependency manifests). Selection is deterministic so the same repository
//! always produces the same evidence.

use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use practicum_core::truncate_chars;

use crate::github::CodeHost;
use crate::resilience::CallError;

/// One fetched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceFile {
    /// Path within the repository.
    pub path: String,

    /// File content, truncated to the collector's size cap.
    pub content: String,
}

/// A bounded snapshot of a repository for grading.
#[derive(Debug, Clone, Default)]
pub struct RepoEvidence {
    /// All blob paths on the default branch.
    pub tree: Vec<String>,

    /// Contents of the selected files.
    pub files: Vec<EvidenceFile>,
}

impl RepoEvidence {
    /// Whether we found anything to grade at all.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty() && self.files.is_empty()
    }

    /// Render the collected files as one plain-text document, for rubric
    /// grading paths that take a single submission string.
    pub fn flattened(&self) -> String {
        if self.files.is_empty() {
            return "(no readable files were found in the repository)".to_string();
        }
        let mut out = String::new();
        for file in &self.files {
            out.push_str("--- file: ");
            out.push_str(&file.path);
            out.push_str(" ---\n");
            out.push_str(&file.content);
            out.push_str("\n\n");
        }
        out
    }
}

/// Gathers [`RepoEvidence`] through a [`CodeHost`].
pub struct EvidenceCollector {
    host: Arc<dyn CodeHost>,
    max_files: usize,
    max_file_chars: usize,
}

impl EvidenceCollector {
    /// Create a collector with explicit caps on file count and per-file size.
    pub fn new(host: Arc<dyn CodeHost>, max_files: usize, max_file_chars: usize) -> Self {
        Self {
            host,
            max_files,
            max_file_chars,
        }
    }

    /// Collect evidence for one repository.
    ///
    /// Any infrastructure failure aborts the whole collection; a repository
    /// with no resolvable default branch yields empty evidence instead.
    pub async fn collect(&self, owner: &str, repo: &str) -> Result<RepoEvidence, CallError> {
        let tree = self.host.repo_file_tree(owner, repo).await?;
        let selected = select_relevant_paths(&tree, self.max_files);
        debug!(
            owner,
            repo,
            tree_size = tree.len(),
            selected = selected.len(),
            "collecting repository evidence"
        );

        let fetches = join_all(
            selected
                .iter()
                .map(|path| self.fetch_file(owner, repo, path)),
        )
        .await;

        let mut files = Vec::with_capacity(selected.len());
        for fetched in fetches {
            if let Some(file) = fetched? {
                files.push(file);
            }
        }

        Ok(RepoEvidence { tree, files })
    }

    /// Fetch one file, trying `main` then `master`. A file present in the
    /// tree can still 404 on both (deleted after the tree was listed); that
    /// is a skip, not a failure.
    async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<EvidenceFile>, CallError> {
        for branch in ["main", "master"] {
            if let Some(content) = self.host.raw_file_content(owner, repo, path, branch).await? {
                return Ok(Some(EvidenceFile {
                    path: path.to_string(),
                    content: truncate_chars(&content, self.max_file_chars),
                }));
            }
        }
        Ok(None)
    }
}

/// Pick up to `max_files` paths worth grading, in priority order:
/// README, entrypoints, container and CI definitions, dependency
/// manifests, infrastructure code. Within a bucket, shallower paths win.
pub fn select_relevant_paths(tree: &[String], max_files: usize) -> Vec<String> {
    let buckets: [fn(&str, &str) -> bool; 8] = [
        |name, _| name.starts_with("readme"),
        |name, _| {
            let stem = name.split('.').next().unwrap_or(name);
            matches!(stem, "main" | "app" | "server" | "index")
        },
        |name, _| name == "dockerfile" || name.starts_with("dockerfile."),
        |name, _| name.starts_with("docker-compose"),
        |_, path| path.contains(".github/workflows/"),
        |name, _| {
            matches!(
                name,
                "requirements.txt" | "package.json" | "cargo.toml" | "pyproject.toml" | "go.mod"
            )
        },
        |name, _| name.ends_with(".tf"),
        |name, _| name == "makefile",
    ];

    let mut candidates: Vec<(usize, usize, &String)> = Vec::new();
    for path in tree {
        let lower = path.to_lowercase();
        if lower.contains("node_modules/") || lower.contains("vendor/") {
            continue;
        }
        let name = lower.rsplit('/').next().unwrap_or(&lower);
        if let Some(bucket) = buckets.iter().position(|matches| matches(name, &lower)) {
            let depth = path.matches('/').count();
            candidates.push((bucket, depth, path));
        }
    }

    candidates.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
    candidates
        .into_iter()
        .map(|(_, _, path)| path.clone())
        .take(max_files)
        .collect()
}
