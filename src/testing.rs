//! Test doubles for the collaborator traits. Every call is recorded so tests
//! can assert on call counts and ordering.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::collab::{
    Analysis, Analyzer, CodeHost, FileVerdict, IssueDetails, PullRequestInfo, Reviewer,
};
use crate::prioritize::FileFilter;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Analyzer that replays a fixed script, then reports "no issue".
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<anyhow::Result<Analysis>>>,
    seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedAnalyzer {
    pub fn new(script: Vec<anyhow::Result<Analysis>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Analyzer that never finds anything.
    pub fn clean() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn files_seen(&self) -> Vec<String> {
        lock(&self.seen).iter().map(|(f, _)| f.clone()).collect()
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze_file(&self, path: &str, content: &str, _issue: &str) -> anyhow::Result<Analysis> {
        lock(&self.seen).push((path.to_string(), content.to_string()));
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Ok(Analysis::no_issue("script exhausted")))
    }
}

/// Reviewer with a verdict per file; unknown files pass.
#[derive(Default)]
pub struct ScriptedReviewer {
    verdicts: HashMap<String, FileVerdict>,
    fail_on: Option<String>,
    seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedReviewer {
    pub fn with(mut self, file: &str, passed: bool, notes: &str) -> Self {
        self.verdicts.insert(
            file.to_string(),
            FileVerdict {
                passed,
                notes: notes.to_string(),
            },
        );
        self
    }

    /// Make the review call for `file` return an error.
    pub fn erroring_on(mut self, file: &str) -> Self {
        self.fail_on = Some(file.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn issues_seen(&self) -> Vec<String> {
        lock(&self.seen).iter().map(|(_, i)| i.clone()).collect()
    }
}

impl Reviewer for ScriptedReviewer {
    fn review_file(&self, path: &str, _content: &str, issue: &str) -> anyhow::Result<FileVerdict> {
        lock(&self.seen).push((path.to_string(), issue.to_string()));
        if self.fail_on.as_deref() == Some(path) {
            anyhow::bail!("model endpoint unavailable");
        }
        Ok(self.verdicts.get(path).cloned().unwrap_or(FileVerdict {
            passed: true,
            notes: "ok".into(),
        }))
    }
}

/// In-memory code host. Workspace files come from `repo_files`; writes are
/// kept separately so tests can inspect them.
#[derive(Default)]
pub struct MockHost {
    repo_files: Vec<(String, String)>,
    remote_files: HashMap<String, String>,
    changed_files: Vec<String>,
    pull_request: Option<PullRequestInfo>,
    issues: HashMap<u64, IssueDetails>,
    pr_number: u64,
    fail_step: Option<&'static str>,
    calls: Mutex<Vec<String>>,
    written: Mutex<Vec<(PathBuf, String)>>,
    issue_comments: Mutex<Vec<(u64, String)>>,
    pr_comments: Mutex<Vec<(u64, String)>>,
    released: Mutex<Vec<PathBuf>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            pr_number: 101,
            ..Self::default()
        }
    }

    /// Add a file to the checkout that `ensure_workspace` produces.
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.repo_files.push((path.to_string(), content.to_string()));
        self
    }

    /// Add a file retrievable through `get_file_at_revision`.
    pub fn with_remote_file(mut self, path: &str, content: &str) -> Self {
        self.remote_files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_changed_files(mut self, files: &[&str]) -> Self {
        self.changed_files = files.iter().map(|f| (*f).to_string()).collect();
        self
    }

    pub fn with_pull_request(mut self, title: &str, body: &str) -> Self {
        self.pull_request = Some(PullRequestInfo {
            title: title.to_string(),
            body: body.to_string(),
            head_sha: "abc123".into(),
        });
        self
    }

    pub fn with_issue(mut self, number: u64, title: &str, body: &str) -> Self {
        self.issues.insert(
            number,
            IssueDetails {
                title: title.to_string(),
                body: body.to_string(),
            },
        );
        self
    }

    pub fn with_pr_number(mut self, number: u64) -> Self {
        self.pr_number = number;
        self
    }

    /// Make the named trait method fail.
    pub fn failing_at(mut self, step: &'static str) -> Self {
        self.fail_step = Some(step);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, step: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == step).count()
    }

    pub fn written(&self) -> Vec<(PathBuf, String)> {
        lock(&self.written).clone()
    }

    pub fn issue_comments(&self) -> Vec<(u64, String)> {
        lock(&self.issue_comments).clone()
    }

    pub fn pr_comments(&self) -> Vec<(u64, String)> {
        lock(&self.pr_comments).clone()
    }

    pub fn released(&self) -> Vec<PathBuf> {
        lock(&self.released).clone()
    }

    fn step(&self, name: &'static str) -> anyhow::Result<()> {
        lock(&self.calls).push(name.to_string());
        if self.fail_step == Some(name) {
            anyhow::bail!("injected {name} failure");
        }
        Ok(())
    }
}

impl CodeHost for MockHost {
    fn get_issue(&self, _repo: &str, number: u64) -> anyhow::Result<IssueDetails> {
        self.step("get_issue")?;
        self.issues
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("issue #{number} not found"))
    }

    fn ensure_workspace(&self, _repo: &str, _dir: &Path) -> anyhow::Result<()> {
        self.step("ensure_workspace")
    }

    fn release_workspace(&self, dir: &Path) -> anyhow::Result<()> {
        lock(&self.released).push(dir.to_path_buf());
        self.step("release_workspace")
    }

    fn create_branch(&self, _dir: &Path, _name: &str) -> anyhow::Result<()> {
        self.step("create_branch")
    }

    fn list_files(&self, _dir: &Path, filter: &FileFilter) -> anyhow::Result<Vec<String>> {
        self.step("list_files")?;
        Ok(self
            .repo_files
            .iter()
            .map(|(p, _)| p.clone())
            .filter(|p| filter.accepts(p))
            .collect())
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        lock(&self.calls).push("read_file".into());
        if let Some((_, content)) = lock(&self.written).iter().rev().find(|(p, _)| p == path) {
            return Some(content.clone());
        }
        self.repo_files
            .iter()
            .find(|(rel, _)| path.ends_with(rel))
            .map(|(_, c)| c.clone())
    }

    fn write_file(&self, path: &Path, content: &str) -> anyhow::Result<()> {
        self.step("write_file")?;
        lock(&self.written).push((path.to_path_buf(), content.to_string()));
        Ok(())
    }

    fn commit(&self, _dir: &Path, _message: &str) -> anyhow::Result<String> {
        self.step("commit")?;
        Ok("deadbeef".into())
    }

    fn push(&self, _dir: &Path, _branch: &str) -> anyhow::Result<()> {
        self.step("push")
    }

    fn create_or_reuse_pr(
        &self,
        _repo: &str,
        _branch: &str,
        _title: &str,
        _body: &str,
    ) -> anyhow::Result<u64> {
        self.step("create_or_reuse_pr")?;
        Ok(self.pr_number)
    }

    fn comment_on_issue(&self, _repo: &str, number: u64, text: &str) -> anyhow::Result<()> {
        self.step("comment_on_issue")?;
        lock(&self.issue_comments).push((number, text.to_string()));
        Ok(())
    }

    fn comment_on_pr(&self, _repo: &str, number: u64, text: &str) -> anyhow::Result<()> {
        self.step("comment_on_pr")?;
        lock(&self.pr_comments).push((number, text.to_string()));
        Ok(())
    }

    fn get_pr_changed_files(&self, _repo: &str, _number: u64) -> anyhow::Result<Vec<String>> {
        self.step("get_pr_changed_files")?;
        Ok(self.changed_files.clone())
    }

    fn get_pull_request(&self, _repo: &str, number: u64) -> anyhow::Result<PullRequestInfo> {
        self.step("get_pull_request")?;
        self.pull_request
            .clone()
            .ok_or_else(|| anyhow::anyhow!("pull request #{number} not found"))
    }

    fn get_file_at_revision(
        &self,
        _repo: &str,
        path: &str,
        _revision: &str,
    ) -> anyhow::Result<String> {
        self.step("get_file_at_revision")?;
        self.remote_files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 Not Found: {path}"))
    }
}
