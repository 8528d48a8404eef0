//! Pull request review workflow.
//!
//! Each changed file is fetched at the PR head and reviewed once against the
//! linked issue. Per-file problems become failed entries; anything that
//! prevents the review as a whole fails the task with no partial results.

use std::sync::{Arc, OnceLock};

use anyhow::Context;
use regex::Regex;

use super::TaskRunner;
use crate::collab::{CodeHost, FileVerdict, PullRequestInfo, Reviewer};
use crate::queue::{
    FileReview, PrReviewTask, ReviewOutcome, Task, TaskKind, TaskStatus, TaskStore, Transition,
};
use crate::template;

pub struct ReviewRunner {
    store: Arc<dyn TaskStore>,
    host: Arc<dyn CodeHost>,
    reviewer: Arc<dyn Reviewer>,
}

/// Issue number referenced by a closing keyword (`fixes #12`, `Closes #3`, ...).
pub fn linked_issue(text: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:fix(?:e[sd])?|close[sd]?|resolve[sd]?)\s*:?\s+#(\d+)")
            .expect("closing keyword regex")
    })
    .captures(text)
    .and_then(|caps| caps[1].parse().ok())
}

impl ReviewRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        host: Arc<dyn CodeHost>,
        reviewer: Arc<dyn Reviewer>,
    ) -> Self {
        Self {
            store,
            host,
            reviewer,
        }
    }

    /// What the PR is supposed to fix: the linked issue if there is one,
    /// else the PR body, else its title.
    fn issue_description(&self, repo: &str, pr: &PullRequestInfo) -> String {
        if let Some(number) = linked_issue(&pr.body) {
            match self.host.get_issue(repo, number) {
                Ok(issue) => {
                    tracing::debug!(issue = number, "reviewing against linked issue");
                    return format!("Title: {}\n\nDescription:\n{}", issue.title, issue.body);
                }
                Err(e) => {
                    tracing::warn!(issue = number, error = %format!("{e:#}"), "linked issue unavailable");
                }
            }
        }
        if pr.body.trim().is_empty() {
            pr.title.clone()
        } else {
            pr.body.clone()
        }
    }

    fn review(&self, target: &PrReviewTask) -> anyhow::Result<ReviewOutcome> {
        let repo = target.repo.as_str();
        let files = if target.changed_files.is_empty() {
            self.host
                .get_pr_changed_files(repo, target.pr_number)
                .context("listing changed files")?
        } else {
            target.changed_files.clone()
        };
        let pr = self
            .host
            .get_pull_request(repo, target.pr_number)
            .context("fetching pull request")?;
        let issue = self.issue_description(repo, &pr);
        tracing::info!(files = files.len(), head = %pr.head_sha, "reviewing pull request");

        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let _span = tracing::info_span!("file", file = %file).entered();
            let content = match self.host.get_file_at_revision(repo, &file, &pr.head_sha) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "could not fetch file");
                    results.push(FileReview {
                        file,
                        passed: false,
                        notes: format!("Could not fetch file content: {e:#}"),
                    });
                    continue;
                }
            };

            let verdict = self
                .reviewer
                .review_file(&file, &content, &issue)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %format!("{e:#}"), "review call failed");
                    FileVerdict {
                        passed: false,
                        notes: format!("Error during file review: {e:#}"),
                    }
                });
            tracing::info!(passed = verdict.passed, "file reviewed");
            results.push(FileReview {
                file,
                passed: verdict.passed,
                notes: verdict.notes,
            });
        }

        Ok(ReviewOutcome::from_files(results))
    }
}

impl TaskRunner for ReviewRunner {
    fn kind(&self) -> TaskKind {
        TaskKind::PrReview
    }

    fn run(&self, task: &Task) -> anyhow::Result<TaskStatus> {
        let pr = task
            .as_review()
            .with_context(|| format!("task {} is not a review task", task.id()))?;
        let _span = tracing::info_span!(
            "review_task",
            task_id = task.id(),
            repo = %pr.repo,
            number = pr.pr_number
        )
        .entered();

        self.store.transition(task.id(), Transition::Claim)?;

        let outcome = match self.review(pr) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "review failed");
                let failed = self
                    .store
                    .transition(task.id(), Transition::Fail(format!("{e:#}")))?;
                return Ok(failed.status());
            }
        };

        let comment = template::render_review_comment(pr.pr_number, &outcome.files);
        let stored = self
            .store
            .transition(task.id(), Transition::Review(outcome))?;
        tracing::info!(status = %stored.status(), "review recorded");

        if let Err(e) =
            comment.and_then(|text| self.host.comment_on_pr(&pr.repo, pr.pr_number, &text))
        {
            tracing::warn!(error = %format!("{e:#}"), "failed to post review comment");
        }
        Ok(stored.status())
    }
}
