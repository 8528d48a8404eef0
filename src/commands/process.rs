use std::sync::Arc;

use clap::Subcommand;

use super::Context;
use super::queue::{CommonArgs, task_line, validate_repo};
use crate::error::ExitError;
use crate::queue::{IssueTask, NewTask, PrReviewTask, TaskKind, TaskStatus, TaskStore};
use crate::runner::{NO_FIXES_FOUND, TaskRunner};
use crate::worker::{Poller, PollerSettings, Shutdown};

#[derive(Debug, Subcommand)]
pub enum ProcessCommand {
    /// Queue (or pick up) one issue and run the fix workflow now
    Issue {
        /// Repository (owner/name)
        #[arg(long)]
        repo: String,
        /// Issue number
        #[arg(long)]
        number: u64,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Queue (or pick up) one pull request and review it now
    Review {
        /// Repository (owner/name)
        #[arg(long)]
        repo: String,
        /// Pull request number
        #[arg(long)]
        number: u64,
        #[command(flatten)]
        common: CommonArgs,
    },
}

impl ProcessCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let (repo, number, common) = match self {
            Self::Issue {
                repo,
                number,
                common,
            }
            | Self::Review {
                repo,
                number,
                common,
            } => (repo.as_str(), *number, common),
        };
        validate_repo(repo)?;
        let ctx = Context::load(common.project_root.as_deref())?;

        let (new_task, runner): (NewTask, Arc<dyn TaskRunner>) = match self {
            Self::Issue { .. } => (
                NewTask::Issue(IssueTask {
                    repo: repo.to_string(),
                    issue_number: number,
                    title: format!("Issue #{number}"),
                    body: String::new(),
                    installation_id: None,
                }),
                Arc::new(ctx.issue_runner()),
            ),
            Self::Review { .. } => (
                NewTask::PrReview(PrReviewTask {
                    repo: repo.to_string(),
                    pr_number: number,
                    changed_files: Vec::new(),
                    installation_id: None,
                }),
                Arc::new(ctx.review_runner()),
            ),
        };
        let kind = runner.kind();

        let enqueued = ctx.store.enqueue(new_task)?;
        let task = ctx.store.get(enqueued.id)?;
        if task.status() == TaskStatus::InProgress {
            return Err(ExitError::Other(format!(
                "task {} for {repo}#{number} is already in progress",
                task.id()
            ))
            .into());
        }

        let settings = PollerSettings::for_kind(&ctx.config, kind);
        let mut poller = Poller::new(ctx.store.clone(), runner, settings, Shutdown::new());
        poller.process(&task)?;

        let done = ctx.store.get(task.id())?;
        println!("{}", task_line(&done));
        match (kind, done.status()) {
            (_, TaskStatus::Completed | TaskStatus::Approved) => Ok(()),
            // Nothing to change is not an error for a one-shot run.
            (TaskKind::Issue, TaskStatus::Failed) if done.error() == Some(NO_FIXES_FOUND) => Ok(()),
            (_, TaskStatus::Rejected) => Err(ExitError::Other(format!(
                "PR {repo}#{number} needs changes"
            ))
            .into()),
            (_, status) => Err(ExitError::Other(format!(
                "task {} ended {status}: {}",
                done.id(),
                done.error().unwrap_or("no error recorded")
            ))
            .into()),
        }
    }
}
