//! Task runners: the per-kind workflows a poller invokes for each claimed task.

pub mod issue;
pub mod review;

use std::path::{Path, PathBuf};

use crate::collab::CodeHost;
use crate::queue::{Task, TaskKind, TaskStatus};

pub use issue::{IssueRunner, IssueSettings};
pub use review::ReviewRunner;

/// Error recorded when issue analysis finished without changing any file.
pub const NO_FIXES_FOUND: &str = "no fixes found";

/// Processes one task. The poller has already counted the attempt.
///
/// Runners record every outcome (including their own failures) through the
/// task store. `Err` means the store itself could not be updated.
pub trait TaskRunner: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Run the task to a terminal status and return that status.
    fn run(&self, task: &Task) -> anyhow::Result<TaskStatus>;
}

/// Releases a workspace exactly once when dropped, on every exit path.
pub(crate) struct WorkspaceGuard<'a> {
    host: &'a dyn CodeHost,
    dir: PathBuf,
}

impl<'a> WorkspaceGuard<'a> {
    pub(crate) fn new(host: &'a dyn CodeHost, dir: PathBuf) -> Self {
        Self { host, dir }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for WorkspaceGuard<'_> {
    fn drop(&mut self) {
        match self.host.release_workspace(&self.dir) {
            Ok(()) => tracing::debug!(workspace = %self.dir.display(), "workspace released"),
            Err(e) => tracing::warn!(
                workspace = %self.dir.display(),
                error = %format!("{e:#}"),
                "failed to release workspace"
            ),
        }
    }
}
