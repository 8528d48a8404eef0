use std::path::PathBuf;

use clap::{Args, Subcommand};

use super::{Context, OutputFormat};
use crate::error::ExitError;
use crate::queue::{
    IssueTask, NewTask, PrReviewTask, QueueStats, Task, TaskId, TaskKind, TaskStatus, TaskStore,
};

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Queue an issue for fixing
    AddIssue {
        /// Repository (owner/name)
        repo: String,
        /// Issue number
        number: u64,
        /// Issue title (defaults to "Issue #N")
        #[arg(long)]
        title: Option<String>,
        /// Issue body
        #[arg(long, default_value = "")]
        body: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Queue a pull request for review
    AddPr {
        /// Repository (owner/name)
        repo: String,
        /// Pull request number
        number: u64,
        /// Changed files (comma-separated; fetched from GitHub when omitted)
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List queued tasks
    List {
        /// Only tasks of this kind
        #[arg(long, value_enum)]
        kind: Option<TaskKind>,
        /// Only tasks in this status
        #[arg(long, value_enum)]
        status: Option<TaskStatus>,
        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Show task counts per kind and status
    Stats {
        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Return a task to pending with attempts and error cleared
    Reset {
        /// Task id
        id: TaskId,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

/// `owner/name` with both parts non-empty.
pub fn validate_repo(repo: &str) -> anyhow::Result<()> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(())
        }
        _ => Err(ExitError::Other(format!("repository must be owner/name, got {repo:?}")).into()),
    }
}

impl QueueCommand {
    fn common(&self) -> &CommonArgs {
        match self {
            Self::AddIssue { common, .. }
            | Self::AddPr { common, .. }
            | Self::List { common, .. }
            | Self::Stats { common, .. }
            | Self::Reset { common, .. } => common,
        }
    }

    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = Context::load(self.common().project_root.as_deref())?;
        let store = ctx.store.as_ref();
        match self {
            Self::AddIssue {
                repo,
                number,
                title,
                body,
                ..
            } => {
                validate_repo(repo)?;
                let enqueued = store.enqueue(NewTask::Issue(IssueTask {
                    repo: repo.clone(),
                    issue_number: *number,
                    title: title.clone().unwrap_or_else(|| format!("Issue #{number}")),
                    body: body.clone(),
                    installation_id: None,
                }))?;
                print_enqueued(enqueued.id, enqueued.created, &format!("issue {repo}#{number}"));
            }
            Self::AddPr {
                repo, number, files, ..
            } => {
                validate_repo(repo)?;
                let enqueued = store.enqueue(NewTask::PrReview(PrReviewTask {
                    repo: repo.clone(),
                    pr_number: *number,
                    changed_files: files.clone(),
                    installation_id: None,
                }))?;
                print_enqueued(enqueued.id, enqueued.created, &format!("PR {repo}#{number}"));
            }
            Self::List {
                kind,
                status,
                format,
                ..
            } => {
                let tasks: Vec<Task> = store
                    .list()?
                    .into_iter()
                    .filter(|t| kind.is_none_or(|k| t.kind() == k))
                    .filter(|t| status.is_none_or(|s| t.status() == s))
                    .collect();
                match OutputFormat::resolve(*format) {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tasks)?),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        for task in &tasks {
                            println!("{}", task_line(task));
                        }
                    }
                }
            }
            Self::Stats { format, .. } => {
                let stats = store.stats()?;
                match OutputFormat::resolve(*format) {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                    OutputFormat::Pretty | OutputFormat::Text => print_stats_text(&stats),
                }
            }
            Self::Reset { id, .. } => {
                let task = store.reset_to_pending(*id)?;
                println!("task {id} reset to {}", task.status());
            }
        }
        Ok(())
    }
}

fn print_enqueued(id: TaskId, created: bool, what: &str) {
    if created {
        println!("queued {what} as task {id}");
    } else {
        println!("{what} is already queued as task {id}");
    }
}

/// One-line summary used by `queue list` and `status --format text`.
pub fn task_line(task: &Task) -> String {
    let mut line = format!(
        "{}  {}  {}#{}  {}  attempts={}",
        task.id(),
        task.kind(),
        task.repo(),
        task.number(),
        task.status(),
        task.attempts()
    );
    if let Some(pr) = task.pr_number() {
        line.push_str(&format!("  pr=#{pr}"));
    }
    if let Some(outcome) = task.review_outcome() {
        let passed = outcome.files.iter().filter(|f| f.passed).count();
        line.push_str(&format!("  files={passed}/{}", outcome.files.len()));
    }
    if let Some(error) = task.error() {
        line.push_str(&format!("  error={error:?}"));
    }
    line
}

pub fn print_stats_text(stats: &QueueStats) {
    for (label, counts) in [("issues", &stats.issues), ("reviews", &stats.reviews)] {
        println!(
            "{label}  pending={}  in_progress={}  completed={}  approved={}  rejected={}  failed={}  total={}",
            counts.pending,
            counts.in_progress,
            counts.completed,
            counts.approved,
            counts.rejected,
            counts.failed,
            counts.total()
        );
    }
}
