use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, Subcommand};

use super::Context;
use crate::error::ExitError;
use crate::queue::TaskKind;
use crate::runner::TaskRunner;
use crate::worker::{Poller, PollerSettings, PollerStats, Shutdown};

#[derive(Debug, Subcommand)]
pub enum RunCommand {
    /// Poll for pending issue tasks and try to fix them
    IssueWorker(RunArgs),
    /// Poll for pending PR review tasks and review them
    ReviewWorker(RunArgs),
    /// Run both pollers side by side
    All(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Seconds between scans (overrides config)
    #[arg(long)]
    pub interval: Option<u64>,
    /// Scan once and exit instead of polling
    #[arg(long)]
    pub once: bool,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl RunCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let (args, kinds): (&RunArgs, &[TaskKind]) = match self {
            Self::IssueWorker(args) => (args, &[TaskKind::Issue]),
            Self::ReviewWorker(args) => (args, &[TaskKind::PrReview]),
            Self::All(args) => (args, &[TaskKind::Issue, TaskKind::PrReview]),
        };
        let ctx = Context::load(args.project_root.as_deref())?;

        let shutdown = Shutdown::new();
        if !args.once {
            shutdown.install_signal_handler()?;
        }

        let mut pollers: Vec<Poller> = kinds
            .iter()
            .map(|&kind| {
                let mut settings = PollerSettings::for_kind(&ctx.config, kind);
                if let Some(secs) = args.interval {
                    settings.interval = Duration::from_secs(secs);
                }
                let runner: Arc<dyn TaskRunner> = match kind {
                    TaskKind::Issue => Arc::new(ctx.issue_runner()),
                    TaskKind::PrReview => Arc::new(ctx.review_runner()),
                };
                Poller::new(ctx.store.clone(), runner, settings, shutdown.clone())
            })
            .collect();

        if args.once {
            for poller in &mut pollers {
                poller.scan()?;
                report(poller.kind(), poller.stats());
            }
            return Ok(());
        }

        let results: Vec<(TaskKind, thread::Result<PollerStats>)> = thread::scope(|scope| {
            let handles: Vec<_> = pollers
                .iter_mut()
                .map(|poller| (poller.kind(), scope.spawn(move || poller.run())))
                .collect();
            handles
                .into_iter()
                .map(|(kind, handle)| (kind, handle.join()))
                .collect()
        });
        finish(results)
    }
}

/// Report every poller's stats. A panicked poller fails the command.
fn finish(results: Vec<(TaskKind, thread::Result<PollerStats>)>) -> anyhow::Result<()> {
    let mut panicked = Vec::new();
    for (kind, result) in results {
        match result {
            Ok(stats) => report(kind, stats),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(%kind, panic = %message, "poller thread panicked");
                panicked.push(format!("{kind}: {message}"));
            }
        }
    }
    if panicked.is_empty() {
        Ok(())
    } else {
        Err(ExitError::Other(format!("poller panicked ({})", panicked.join(", "))).into())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn report(kind: TaskKind, stats: PollerStats) {
    println!(
        "{kind}  processed={}  failed={}  exhausted={}  scans={}",
        stats.processed, stats.failed, stats.exhausted, stats.scans
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panicked_poller_fails_the_run() {
        let boom: Box<dyn Any + Send> = Box::new("lost the store");
        let results = vec![
            (TaskKind::Issue, Ok(PollerStats::default())),
            (TaskKind::PrReview, Err(boom)),
        ];
        let err = finish(results).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("pr_review"), "{message}");
        assert!(message.contains("lost the store"), "{message}");
        assert!(matches!(err.downcast_ref::<ExitError>(), Some(ExitError::Other(_))));
    }

    #[test]
    fn clean_pollers_succeed() {
        let results = vec![(TaskKind::Issue, Ok(PollerStats::default()))];
        assert!(finish(results).is_ok());
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
