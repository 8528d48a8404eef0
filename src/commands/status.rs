use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use super::queue::{print_stats_text, task_line};
use super::{Context, OutputFormat};
use crate::queue::{QueueStats, StatusCounts, Task, TaskStore};

const RECENT: usize = 10;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub store: PathBuf,
    pub stats: QueueStats,
    /// Most recently updated tasks first.
    pub recent: Vec<Task>,
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = Context::load(self.project_root.as_deref())?;
        let mut tasks = ctx.store.list()?;
        let stats = QueueStats::from_tasks(&tasks);
        tasks.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()).then(b.id().cmp(&a.id())));
        tasks.truncate(RECENT);
        let report = StatusReport {
            store: ctx.config.store_path(),
            stats,
            recent: tasks,
        };

        match OutputFormat::resolve(self.format) {
            OutputFormat::Pretty => print_pretty(&report),
            OutputFormat::Text => print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        Ok(())
    }
}

fn counts_row(label: &str, c: &StatusCounts) -> String {
    format!(
        "|{label}|{}|{}|{}|{}|{}|{}|{}|\n",
        c.pending,
        c.in_progress,
        c.completed,
        c.approved,
        c.rejected,
        c.failed,
        c.total()
    )
}

/// Markdown rendered by termimad for terminals.
pub fn pretty_markdown(report: &StatusReport) -> String {
    let mut md = String::from("# coding-agent status\n\n");
    md.push_str(&format!("Store: `{}`\n\n", report.store.display()));
    md.push_str("|kind|pending|in progress|completed|approved|rejected|failed|total|\n");
    md.push_str("|:-|-:|-:|-:|-:|-:|-:|-:|\n");
    md.push_str(&counts_row("issues", &report.stats.issues));
    md.push_str(&counts_row("reviews", &report.stats.reviews));

    if report.recent.is_empty() {
        md.push_str("\n*Queue is empty.*\n");
        return md;
    }
    md.push_str("\n## Recent tasks\n\n|id|kind|target|status|attempts|detail|\n|-:|:-|:-|:-|-:|:-|\n");
    for task in &report.recent {
        let detail = match (task.pr_number(), task.error()) {
            (Some(pr), _) => format!("PR #{pr}"),
            (None, Some(error)) => error.replace('|', "/"),
            (None, None) => String::new(),
        };
        md.push_str(&format!(
            "|{}|{}|{}#{}|{}|{}|{detail}|\n",
            task.id(),
            task.kind(),
            task.repo(),
            task.number(),
            task.status(),
            task.attempts()
        ));
    }
    md
}

fn print_pretty(report: &StatusReport) {
    termimad::MadSkin::default().print_text(&pretty_markdown(report));
}

fn print_text(report: &StatusReport) {
    println!("store  path={}", report.store.display());
    print_stats_text(&report.stats);
    for task in &report.recent {
        println!("{}", task_line(task));
    }
}
