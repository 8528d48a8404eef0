//! Issue-fix workflow.
//!
//! claimed -> workspace ready -> branched -> files analyzed ->
//! (committed and PR opened | no changes) -> cleaned up.
//! Any error moves the task to FAILED. The workspace is released on every path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use rand::Rng;

use super::{NO_FIXES_FOUND, TaskRunner, WorkspaceGuard};
use crate::collab::{Analyzer, CodeHost};
use crate::config::Config;
use crate::convergence::{self, Limits, Outcome};
use crate::prioritize::{self, FileFilter};
use crate::queue::{IssueTask, Task, TaskKind, TaskStatus, TaskStore, Transition};
use crate::template;

/// Knobs for the issue workflow, normally taken from [`Config`].
#[derive(Debug, Clone)]
pub struct IssueSettings {
    /// Parent directory for per-attempt checkouts.
    pub workspaces_root: PathBuf,
    pub limits: Limits,
    pub extensions: Vec<String>,
    pub excluded_dirs: Vec<String>,
    /// Repo-relative ignore list.
    pub ignore_file: String,
    pub branch_prefix: String,
}

impl IssueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspaces_root: config.workspaces_dir(),
            limits: Limits {
                max_iterations: config.fix.max_iterations,
                max_chars: config.fix.max_file_chars,
            },
            extensions: config.fix.extensions.clone(),
            excluded_dirs: config.fix.excluded_dirs.clone(),
            ignore_file: config.fix.ignore_file.clone(),
            branch_prefix: config.fix.branch_prefix.clone(),
        }
    }

    pub fn branch_for(&self, issue_number: u64) -> String {
        format!("{}{issue_number}", self.branch_prefix)
    }
}

pub struct IssueRunner {
    store: Arc<dyn TaskStore>,
    host: Arc<dyn CodeHost>,
    analyzer: Arc<dyn Analyzer>,
    settings: IssueSettings,
}

impl IssueRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        host: Arc<dyn CodeHost>,
        analyzer: Arc<dyn Analyzer>,
        settings: IssueSettings,
    ) -> Self {
        Self {
            store,
            host,
            analyzer,
            settings,
        }
    }

    /// Unique per task attempt, so no two runs ever share a checkout.
    fn workspace_dir(&self, task: &Task) -> PathBuf {
        let suffix: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(6)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        self.settings
            .workspaces_root
            .join(format!("task-{}-a{}-{suffix}", task.id(), task.attempts()))
    }

    /// Steps 2..7. Returns the PR number, or None when nothing changed.
    fn fix(&self, issue: &IssueTask, dir: &Path) -> anyhow::Result<Option<u64>> {
        let host = self.host.as_ref();
        let repo = issue.repo.as_str();
        let number = issue.issue_number;

        let (title, body) = match host.get_issue(repo, number) {
            Ok(details) => (details.title, details.body),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "could not refresh issue, using queued copy");
                (issue.title.clone(), issue.body.clone())
            }
        };
        let description = format!("Title: {title}\n\nDescription:\n{body}");

        host.ensure_workspace(repo, dir)
            .with_context(|| format!("preparing workspace for {repo}"))?;

        let branch = self.settings.branch_for(number);
        host.create_branch(dir, &branch)
            .with_context(|| format!("creating branch {branch}"))?;

        let ignore = host
            .read_file(&dir.join(&self.settings.ignore_file))
            .map(|contents| prioritize::parse_ignore_list(&contents))
            .unwrap_or_default();
        if !ignore.is_empty() {
            tracing::debug!(patterns = ignore.len(), "loaded ignore list");
        }
        let filter = FileFilter {
            extensions: self.settings.extensions.clone(),
            excluded_dirs: self.settings.excluded_dirs.clone(),
            ignore,
        };
        let files = host.list_files(dir, &filter).context("listing files")?;
        let files = prioritize::prioritize(files, &description);
        tracing::info!(files = files.len(), "analyzing candidate files");

        let mut fixed = Vec::new();
        for rel in files {
            let _span = tracing::info_span!("file", file = %rel).entered();
            let path = dir.join(&rel);
            let Some(content) = host.read_file(&path).filter(|c| !c.is_empty()) else {
                tracing::debug!("unreadable or empty, skipping");
                continue;
            };

            let result = convergence::converge(
                self.analyzer.as_ref(),
                &rel,
                &content,
                &description,
                self.settings.limits,
            );
            match &result.outcome {
                Outcome::Skipped { chars } => tracing::info!(chars, "too large, skipped"),
                Outcome::BudgetExhausted { iterations } => {
                    tracing::info!(iterations, "iteration ceiling reached, keeping last correction");
                }
                Outcome::AnalyzerFailed { error, .. } => {
                    tracing::warn!(%error, "analysis failed for file");
                }
                Outcome::NoChangeNeeded | Outcome::Verified { .. } => {}
            }

            if result.changed {
                host.write_file(&path, &result.content)
                    .with_context(|| format!("writing {rel}"))?;
                fixed.push(rel);
            }
        }

        if fixed.is_empty() {
            tracing::info!("no fixes needed for this issue");
            self.comment(repo, number, template::render_no_fixes());
            return Ok(None);
        }

        tracing::info!(files = ?fixed, "fixed files");
        host.commit(dir, &format!("fix: resolve issue #{number}\n\n{title}"))
            .context("committing fix")?;
        host.push(dir, &branch)
            .with_context(|| format!("pushing {branch}"))?;

        let pr_body = template::render_pr_body(number, &title, &body, &fixed)?;
        let pr_number = host
            .create_or_reuse_pr(repo, &branch, &format!("Fix #{number}: {title}"), &pr_body)
            .context("opening pull request")?;

        self.comment(repo, number, template::render_fix_opened(pr_number, &fixed));
        Ok(Some(pr_number))
    }

    /// Issue comments are best effort.
    fn comment(&self, repo: &str, number: u64, text: anyhow::Result<String>) {
        let result = text.and_then(|text| self.host.comment_on_issue(repo, number, &text));
        if let Err(e) = result {
            tracing::warn!(error = %format!("{e:#}"), "failed to comment on issue");
        }
    }
}

impl TaskRunner for IssueRunner {
    fn kind(&self) -> TaskKind {
        TaskKind::Issue
    }

    fn run(&self, task: &Task) -> anyhow::Result<TaskStatus> {
        let issue = task
            .as_issue()
            .with_context(|| format!("task {} is not an issue task", task.id()))?;
        let _span = tracing::info_span!(
            "issue_task",
            task_id = task.id(),
            repo = %issue.repo,
            number = issue.issue_number
        )
        .entered();

        self.store.transition(task.id(), Transition::Claim)?;

        let result = {
            let workspace = WorkspaceGuard::new(self.host.as_ref(), self.workspace_dir(task));
            self.fix(issue, workspace.path())
        };

        let transition = match result {
            Ok(Some(pr_number)) => {
                tracing::info!(pr_number, "issue fixed");
                Transition::Complete { pr_number }
            }
            Ok(None) => Transition::Fail(NO_FIXES_FOUND.to_string()),
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "issue task failed");
                Transition::Fail(format!("{e:#}"))
            }
        };
        Ok(self.store.transition(task.id(), transition)?.status())
    }
}
