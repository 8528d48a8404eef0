//! Local checkouts driven through the `git` CLI.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use crate::prioritize::FileFilter;
use crate::subprocess::{RunOutput, Tool};

const GIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Clones, branches, commits and pushes on behalf of the issue workflow.
#[derive(Debug, Clone)]
pub struct GitWorkspaces {
    /// `https://github.com`, or a local directory holding `<owner>/<name>.git` repos.
    clone_base: String,
    token: Option<String>,
    author_name: String,
    author_email: String,
}

impl GitWorkspaces {
    pub fn new(
        clone_base: impl Into<String>,
        token: Option<String>,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
    ) -> Self {
        Self {
            clone_base: clone_base.into(),
            token,
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }

    /// Remote URL for `repo`, with the token embedded for HTTP remotes.
    pub fn clone_url(&self, repo: &str) -> String {
        let base = self.clone_base.trim_end_matches('/');
        let base = match &self.token {
            Some(token) => match base.split_once("://") {
                Some((scheme @ ("http" | "https"), rest)) => {
                    format!("{scheme}://x-access-token:{token}@{rest}")
                }
                _ => base.to_string(),
            },
            None => base.to_string(),
        };
        format!("{base}/{repo}.git")
    }

    fn git(&self) -> Tool {
        let tool = Tool::new("git")
            .timeout(GIT_TIMEOUT)
            .env("GIT_TERMINAL_PROMPT", "0");
        match &self.token {
            Some(token) => tool.redact(token),
            None => tool,
        }
    }

    fn git_in(&self, dir: &Path, args: &[&str]) -> anyhow::Result<RunOutput> {
        self.git().current_dir(dir).args(args).run_ok()
    }

    /// Clone into `dir`, or bring an existing checkout back to a clean default branch.
    pub fn ensure(&self, repo: &str, dir: &Path) -> anyhow::Result<()> {
        if dir.join(".git").is_dir() {
            match self.update(dir) {
                Ok(()) => {
                    tracing::info!(repo, dir = %dir.display(), "updated existing checkout");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "update failed, cloning fresh");
                    self.release(dir)?;
                }
            }
        }
        self.clone_into(repo, dir)
    }

    fn clone_into(&self, repo: &str, dir: &Path) -> anyhow::Result<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        if dir.exists() {
            self.release(dir)?;
        }
        let url = self.clone_url(repo);
        let target = dir.to_string_lossy().into_owned();
        self.git()
            .args(&["clone", "--quiet", &url, &target])
            .run_ok()
            .with_context(|| format!("cloning {repo}"))?;
        tracing::info!(repo, dir = %dir.display(), "cloned repository");
        Ok(())
    }

    fn update(&self, dir: &Path) -> anyhow::Result<()> {
        self.git_in(dir, &["fetch", "--quiet", "origin"])?;
        let default = self.default_branch(dir)?;
        self.git_in(dir, &["reset", "--hard"])?;
        self.git_in(dir, &["clean", "-fd"])?;
        self.git_in(dir, &["checkout", "--quiet", &default])?;
        let upstream = format!("origin/{default}");
        self.git_in(dir, &["reset", "--hard", &upstream])?;
        Ok(())
    }

    /// Branch `origin/HEAD` points at.
    fn default_branch(&self, dir: &Path) -> anyhow::Result<String> {
        let out = self.git_in(dir, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])?;
        let name = out.stdout.trim();
        Ok(name.strip_prefix("origin/").unwrap_or(name).to_string())
    }

    pub fn create_branch(&self, dir: &Path, name: &str) -> anyhow::Result<()> {
        let switched = self
            .git()
            .current_dir(dir)
            .args(&["checkout", "--quiet", name])
            .run()?;
        if switched.success() {
            tracing::debug!(branch = name, "switched to existing branch");
            return Ok(());
        }
        self.git_in(dir, &["checkout", "--quiet", "-b", name])?;
        tracing::debug!(branch = name, "created branch");
        Ok(())
    }

    pub fn commit(&self, dir: &Path, message: &str) -> anyhow::Result<String> {
        self.git_in(dir, &["add", "--all"])?;
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.git_in(
            dir,
            &["-c", &name, "-c", &email, "commit", "--quiet", "-m", message],
        )?;
        let head = self.git_in(dir, &["rev-parse", "HEAD"])?;
        Ok(head.stdout.trim().to_string())
    }

    pub fn push(&self, dir: &Path, branch: &str) -> anyhow::Result<()> {
        self.git_in(
            dir,
            &["push", "--quiet", "--force", "--set-upstream", "origin", branch],
        )?;
        tracing::info!(branch, "pushed branch");
        Ok(())
    }

    /// Walk the checkout in sorted order, pruning excluded directories.
    pub fn list_files(&self, dir: &Path, filter: &FileFilter) -> anyhow::Result<Vec<String>> {
        let mut files = Vec::new();
        walk(dir, "", filter, &mut files)?;
        Ok(files)
    }

    pub fn release(&self, dir: &Path) -> anyhow::Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", dir.display())),
        }
    }
}

fn walk(dir: &Path, prefix: &str, filter: &FileFilter, out: &mut Vec<String>) -> anyhow::Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading {}", dir.display()))?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if name == ".git" || filter.excluded_dirs.iter().any(|x| *x == name) {
                continue;
            }
            walk(&entry.path(), &rel, filter, out)?;
        } else if file_type.is_file() && filter.accepts(&rel) {
            out.push(rel);
        }
    }
    Ok(())
}
