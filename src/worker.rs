//! Pollers: one sequential loop per task kind.
//!
//! A poller claims a small batch of pending tasks, enforces the attempt
//! ceiling, counts the attempt, and hands each task to its runner. The stop
//! flag is only checked between tasks, so in-flight work always finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;

use crate::config::Config;
use crate::queue::{Task, TaskKind, TaskStatus, TaskStore, Transition};
use crate::runner::TaskRunner;

const SLEEP_STEP: Duration = Duration::from_secs(1);

/// Cooperative stop flag shared by pollers and the signal handler.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Trigger on SIGINT/SIGTERM. Can be installed once per process.
    pub fn install_signal_handler(&self) -> anyhow::Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if !flag.is_triggered() {
                eprintln!("shutdown requested, finishing current task...");
            }
            flag.trigger();
        })
        .context("installing signal handler")
    }

    /// Sleep for up to `total`, waking every second to check the flag.
    /// Returns true if shutdown was requested.
    pub fn sleep(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_triggered() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SLEEP_STEP.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub interval: Duration,
    pub batch: usize,
    pub max_attempts: u32,
}

impl PollerSettings {
    pub fn for_kind(config: &Config, kind: TaskKind) -> Self {
        Self {
            interval: Duration::from_secs(config.worker.interval),
            batch: match kind {
                TaskKind::Issue => config.worker.issue_batch,
                TaskKind::PrReview => config.worker.review_batch,
            },
            max_attempts: config.worker.max_attempts,
        }
    }
}

/// Counters reported when a poller exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub scans: u64,
    /// Tasks handed to the runner.
    pub processed: u64,
    pub failed: u64,
    /// Tasks failed by the attempt ceiling without running.
    pub exhausted: u64,
}

pub struct Poller {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn TaskRunner>,
    settings: PollerSettings,
    shutdown: Shutdown,
    stats: PollerStats,
}

impl Poller {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn TaskRunner>,
        settings: PollerSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            runner,
            settings,
            shutdown,
            stats: PollerStats::default(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.runner.kind()
    }

    pub fn stats(&self) -> PollerStats {
        self.stats
    }

    /// Poll until shutdown. Scan errors are logged and retried next interval.
    pub fn run(&mut self) -> PollerStats {
        let kind = self.kind();
        tracing::info!(
            %kind,
            interval_secs = self.settings.interval.as_secs(),
            batch = self.settings.batch,
            max_attempts = self.settings.max_attempts,
            "poller started"
        );
        while !self.shutdown.is_triggered() {
            if let Err(e) = self.scan() {
                tracing::error!(%kind, error = %format!("{e:#}"), "scan failed");
            }
            if self.shutdown.sleep(self.settings.interval) {
                break;
            }
        }
        tracing::info!(
            %kind,
            processed = self.stats.processed,
            failed = self.stats.failed,
            exhausted = self.stats.exhausted,
            "poller stopped"
        );
        self.stats
    }

    /// Claim one batch and process it in claim order. Returns tasks handled.
    pub fn scan(&mut self) -> anyhow::Result<usize> {
        let kind = self.kind();
        let _span = tracing::debug_span!("scan", %kind).entered();
        self.stats.scans += 1;

        let tasks = self.store.claim_pending(kind, self.settings.batch)?;
        if !tasks.is_empty() {
            tracing::info!(%kind, count = tasks.len(), "claimed pending tasks");
        }

        let mut handled = 0;
        for task in &tasks {
            if self.shutdown.is_triggered() {
                tracing::info!("shutdown requested, leaving remaining tasks pending");
                break;
            }
            match self.process(task) {
                Ok(status) => tracing::info!(task_id = task.id(), %status, "task finished"),
                Err(e) => {
                    self.stats.failed += 1;
                    tracing::error!(task_id = task.id(), error = %format!("{e:#}"), "task errored");
                }
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Apply the attempt ceiling, count the attempt, then run the task.
    pub fn process(&mut self, task: &Task) -> anyhow::Result<TaskStatus> {
        let id = task.id();
        let max = self.settings.max_attempts;
        if task.attempts() >= max {
            tracing::warn!(task_id = id, attempts = task.attempts(), "max attempts exceeded");
            let failed = self
                .store
                .transition(id, Transition::Fail(format!("max attempts ({max}) exceeded")))?;
            self.stats.exhausted += 1;
            self.stats.failed += 1;
            return Ok(failed.status());
        }

        let attempt = self.store.increment_attempts(id)?;
        let task = self.store.get(id)?;
        tracing::debug!(task_id = id, attempt, max, "processing task");

        self.stats.processed += 1;
        let status = self.runner.run(&task)?;
        if status == TaskStatus::Failed {
            self.stats.failed += 1;
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JsonTaskStore;
    use std::sync::Mutex;

    /// Runner that claims and completes or fails, recording what it saw.
    struct RecordingRunner {
        store: Arc<JsonTaskStore>,
        seen: Mutex<Vec<(u64, u32)>>,
        fail: bool,
        stop_after_first: Option<Shutdown>,
    }

    impl RecordingRunner {
        fn new(store: Arc<JsonTaskStore>) -> Self {
            Self {
                store,
                seen: Mutex::new(Vec::new()),
                fail: false,
                stop_after_first: None,
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl TaskRunner for RecordingRunner {
        fn kind(&self) -> TaskKind {
            TaskKind::Issue
        }

        fn run(&self, task: &Task) -> anyhow::Result<TaskStatus> {
            self.seen.lock().unwrap().push((task.id(), task.attempts()));
            if let Some(shutdown) = &self.stop_after_first {
                shutdown.trigger();
            }
            self.store.transition(task.id(), Transition::Claim)?;
            let next = if self.fail {
                Transition::Fail("boom".into())
            } else {
                Transition::Complete { pr_number: 1 }
            };
            Ok(self.store.transition(task.id(), next)?.status())
        }
    }

    fn settings(batch: usize) -> PollerSettings {
        PollerSettings {
            interval: Duration::ZERO,
            batch,
            max_attempts: 3,
        }
    }

    fn poller(store: &Arc<JsonTaskStore>, runner: &Arc<RecordingRunner>, batch: usize) -> Poller {
        Poller::new(store.clone(), runner.clone(), settings(batch), Shutdown::new())
    }

    #[test]
    fn exhausted_task_fails_without_running() {
        let store = Arc::new(JsonTaskStore::in_memory());
        let runner = Arc::new(RecordingRunner::new(store.clone()));
        let id = store.enqueue_issue("o/r", 1, "t", "").unwrap();
        for _ in 0..3 {
            store.increment_attempts(id).unwrap();
        }

        let mut poller = poller(&store, &runner, 1);
        poller.scan().unwrap();

        assert_eq!(runner.calls(), 0);
        let task = store.get(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.error().unwrap().contains("max attempts"));
        assert_eq!(task.attempts(), 3);
        assert_eq!(poller.stats().exhausted, 1);
    }

    #[test]
    fn attempt_is_counted_before_running() {
        let store = Arc::new(JsonTaskStore::in_memory());
        let runner = Arc::new(RecordingRunner::new(store.clone()));
        let id = store.enqueue_issue("o/r", 1, "t", "").unwrap();

        poller(&store, &runner, 1).scan().unwrap();

        assert_eq!(*runner.seen.lock().unwrap(), vec![(id, 1)]);
        assert_eq!(store.get(id).unwrap().status(), TaskStatus::Completed);
    }

    #[test]
    fn batch_limit_and_order() {
        let store = Arc::new(JsonTaskStore::in_memory());
        let runner = Arc::new(RecordingRunner::new(store.clone()));
        let ids: Vec<_> = (1..=3)
            .map(|n| store.enqueue_issue("o/r", n, "t", "").unwrap())
            .collect();

        let mut poller = poller(&store, &runner, 2);
        assert_eq!(poller.scan().unwrap(), 2);
        let seen: Vec<_> = runner.seen.lock().unwrap().iter().map(|(id, _)| *id).collect();
        assert_eq!(seen, vec![ids[0], ids[1]]);

        assert_eq!(poller.scan().unwrap(), 1);
        assert_eq!(poller.scan().unwrap(), 0);
        assert_eq!(poller.stats().processed, 3);
        assert_eq!(poller.stats().scans, 3);
    }

    #[test]
    fn terminal_tasks_are_never_picked_up_again() {
        let store = Arc::new(JsonTaskStore::in_memory());
        let mut runner = RecordingRunner::new(store.clone());
        runner.fail = true;
        let runner = Arc::new(runner);
        store.enqueue_issue("o/r", 1, "t", "").unwrap();

        let mut poller = poller(&store, &runner, 5);
        poller.scan().unwrap();
        poller.scan().unwrap();
        assert_eq!(runner.calls(), 1);
        assert_eq!(poller.stats().failed, 1);
    }

    #[test]
    fn shutdown_is_checked_between_tasks() {
        let store = Arc::new(JsonTaskStore::in_memory());
        let shutdown = Shutdown::new();
        let mut runner = RecordingRunner::new(store.clone());
        runner.stop_after_first = Some(shutdown.clone());
        let runner = Arc::new(runner);
        for n in 1..=3 {
            store.enqueue_issue("o/r", n, "t", "").unwrap();
        }

        let mut poller = Poller::new(store.clone(), runner.clone(), settings(3), shutdown);
        let stats = poller.run();

        // The in-flight task finished; the rest stay pending.
        assert_eq!(runner.calls(), 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(store.stats().unwrap().issues.pending, 2);
        assert_eq!(store.stats().unwrap().issues.completed, 1);
    }

    #[test]
    fn sleep_returns_early_on_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let started = Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!Shutdown::new().sleep(Duration::ZERO));
    }
}
