//! External collaborators: the code host (GitHub + local git checkouts) and
//! the language-model analyzer/reviewer.
//!
//! The queue engine only talks to these traits. Concrete implementations
//! live in the submodules; tests use the doubles in `crate::testing`.

pub mod git;
pub mod github;
pub mod llm;

use std::path::Path;

use crate::prioritize::FileFilter;

pub use git::GitWorkspaces;
pub use github::{GitHubClient, GitHubHost};
pub use llm::OpenAiClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDetails {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub title: String,
    pub body: String,
    pub head_sha: String,
}

/// Result of asking the model whether a file is affected by an issue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Analysis {
    pub issue_found: bool,
    /// Full replacement content for the file, when the model proposes one.
    pub correction: Option<String>,
    pub explanation: String,
}

impl Analysis {
    pub fn no_issue(explanation: impl Into<String>) -> Self {
        Self {
            issue_found: false,
            correction: None,
            explanation: explanation.into(),
        }
    }
}

/// Single-pass review verdict for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVerdict {
    pub passed: bool,
    pub notes: String,
}

/// Repository hosting plus local checkouts.
///
/// Workspace paths are chosen by the caller so that release can always be
/// attempted, even when `ensure_workspace` fails halfway.
pub trait CodeHost: Send + Sync {
    fn get_issue(&self, repo: &str, number: u64) -> anyhow::Result<IssueDetails>;

    /// Clone `repo` into `dir`, or hard-reset and pull if it is already a checkout.
    fn ensure_workspace(&self, repo: &str, dir: &Path) -> anyhow::Result<()>;

    /// Remove the checkout and everything under it.
    fn release_workspace(&self, dir: &Path) -> anyhow::Result<()>;

    /// Create `name`, or switch to it if it already exists.
    fn create_branch(&self, dir: &Path, name: &str) -> anyhow::Result<()>;

    /// Repo-relative, `/`-separated paths accepted by `filter`, in traversal order.
    fn list_files(&self, dir: &Path, filter: &FileFilter) -> anyhow::Result<Vec<String>>;

    /// File content, or None if it is missing or not valid UTF-8.
    fn read_file(&self, path: &Path) -> Option<String>;

    fn write_file(&self, path: &Path, content: &str) -> anyhow::Result<()>;

    /// Stage everything and commit. Returns the new revision id.
    fn commit(&self, dir: &Path, message: &str) -> anyhow::Result<String>;

    /// Force-push `branch` to origin.
    fn push(&self, dir: &Path, branch: &str) -> anyhow::Result<()>;

    /// Open a PR from `branch`, or return the number of the one already open.
    fn create_or_reuse_pr(
        &self,
        repo: &str,
        branch: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<u64>;

    fn comment_on_issue(&self, repo: &str, number: u64, text: &str) -> anyhow::Result<()>;

    fn comment_on_pr(&self, repo: &str, number: u64, text: &str) -> anyhow::Result<()>;

    fn get_pr_changed_files(&self, repo: &str, number: u64) -> anyhow::Result<Vec<String>>;

    fn get_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<PullRequestInfo>;

    fn get_file_at_revision(&self, repo: &str, path: &str, revision: &str)
    -> anyhow::Result<String>;
}

/// Model-backed per-file analysis used by the fix loop.
///
/// Malformed model output must come back as `Ok(Analysis::no_issue(..))`;
/// `Err` is reserved for transport failures.
pub trait Analyzer: Send + Sync {
    fn analyze_file(&self, path: &str, content: &str, issue: &str) -> anyhow::Result<Analysis>;
}

/// Model-backed single-pass review of one file against an issue.
///
/// Malformed model output must come back as a failed verdict, not `Err`.
pub trait Reviewer: Send + Sync {
    fn review_file(&self, path: &str, content: &str, issue: &str)
    -> anyhow::Result<FileVerdict>;
}
