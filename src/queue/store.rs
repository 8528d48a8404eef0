//! Durable task store.
//!
//! [`JsonTaskStore`] keeps the whole queue in one JSON document. Every
//! mutation reloads the document under a cross-process lock file, applies
//! the change, and replaces the file atomically (temp file, fsync, rename,
//! then fsync of the parent directory).
//! Readers never see a partial write.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::lock::FileLock;
use super::task::{
    IssueTask, NewTask, PrReviewTask, Task, TaskId, TaskKind, TaskStatus, Transition,
};
use crate::error::StoreError;

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of [`TaskStore::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: TaskId,
    /// False when an active task with the same key already existed.
    pub created: bool,
}

/// Per-status counts for one task kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub approved: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        *self.slot(status) += 1;
    }

    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Completed => self.completed,
            TaskStatus::Approved => self.approved,
            TaskStatus::Rejected => self.rejected,
            TaskStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.approved + self.rejected + self.failed
    }

    fn slot(&mut self, status: TaskStatus) -> &mut usize {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Approved => &mut self.approved,
            TaskStatus::Rejected => &mut self.rejected,
            TaskStatus::Failed => &mut self.failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub issues: StatusCounts,
    pub reviews: StatusCounts,
}

impl QueueStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.for_kind_mut(task.kind()).record(task.status());
        }
        stats
    }

    pub fn for_kind(&self, kind: TaskKind) -> &StatusCounts {
        match kind {
            TaskKind::Issue => &self.issues,
            TaskKind::PrReview => &self.reviews,
        }
    }

    fn for_kind_mut(&mut self, kind: TaskKind) -> &mut StatusCounts {
        match kind {
            TaskKind::Issue => &mut self.issues,
            TaskKind::PrReview => &mut self.reviews,
        }
    }
}

/// Persistent queue of issue-fix and PR-review tasks.
///
/// Implementations must make every method atomic with respect to every
/// other method, including across processes sharing the same backing file.
pub trait TaskStore: Send + Sync {
    /// Insert a pending task, or return the id of the existing active task
    /// with the same (kind, repo, number).
    fn enqueue(&self, task: NewTask) -> Result<Enqueued, StoreError>;

    /// Up to `limit` pending tasks of `kind`, oldest first. Does not mutate.
    fn claim_pending(&self, kind: TaskKind, limit: usize) -> Result<Vec<Task>, StoreError>;

    fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError>;

    /// Atomically add one to the attempt counter and return the new value.
    fn increment_attempts(&self, id: TaskId) -> Result<u32, StoreError>;

    fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// All tasks in insertion order.
    fn list(&self) -> Result<Vec<Task>, StoreError>;

    /// Most recently created task for the key, in any status.
    fn find_latest(
        &self,
        kind: TaskKind,
        repo: &str,
        number: u64,
    ) -> Result<Option<Task>, StoreError>;

    fn stats(&self) -> Result<QueueStats, StoreError> {
        Ok(QueueStats::from_tasks(&self.list()?))
    }

    fn enqueue_issue(
        &self,
        repo: &str,
        issue_number: u64,
        title: &str,
        body: &str,
    ) -> Result<TaskId, StoreError> {
        self.enqueue(NewTask::Issue(IssueTask {
            repo: repo.to_string(),
            issue_number,
            title: title.to_string(),
            body: body.to_string(),
            installation_id: None,
        }))
        .map(|e| e.id)
    }

    fn enqueue_pr_review(
        &self,
        repo: &str,
        pr_number: u64,
        changed_files: &[String],
    ) -> Result<TaskId, StoreError> {
        self.enqueue(NewTask::PrReview(PrReviewTask {
            repo: repo.to_string(),
            pr_number,
            changed_files: changed_files.to_vec(),
            installation_id: None,
        }))
        .map(|e| e.id)
    }

    /// Return any task to PENDING with attempts, error and result cleared.
    fn reset_to_pending(&self, id: TaskId) -> Result<Task, StoreError> {
        self.transition(id, Transition::Reset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default = "first_id")]
    next_id: TaskId,
    #[serde(default)]
    tasks: Vec<Task>,
}

const fn first_id() -> TaskId {
    1
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            next_id: first_id(),
            tasks: Vec::new(),
        }
    }
}

impl Snapshot {
    fn find_mut(&mut self, id: TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(StoreError::NotFound(id))
    }
}

#[derive(Debug)]
struct Backing {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
}

/// JSON-file task store. See the module docs for the durability scheme.
#[derive(Debug)]
pub struct JsonTaskStore {
    backing: Option<Backing>,
    state: Mutex<Snapshot>,
}

impl JsonTaskStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let backing = Backing {
            lock_path: sibling(&path, ".lock"),
            tmp_path: sibling(&path, ".tmp"),
            path,
        };
        let snapshot = load(&backing.path)?;
        Ok(Self {
            backing: Some(backing),
            state: Mutex::new(snapshot),
        })
    }

    /// Store that lives only in memory, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            backing: None,
            state: Mutex::new(Snapshot::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.backing.as_ref().map(|b| b.path.as_path())
    }

    fn lock_state(&self) -> MutexGuard<'_, Snapshot> {
        // A panic mid-mutation never touches the committed snapshot.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T, StoreError> {
        let mut state = self.lock_state();
        if let Some(backing) = &self.backing {
            *state = load(&backing.path)?;
        }
        Ok(f(&state))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.lock_state();
        let Some(backing) = &self.backing else {
            let mut next = state.clone();
            let value = f(&mut next)?;
            *state = next;
            return Ok(value);
        };

        if let Some(parent) = backing.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let _lock = FileLock::acquire(&backing.lock_path, LOCK_TIMEOUT)?;
        let mut next = load(&backing.path)?;
        let value = f(&mut next)?;
        persist(backing, &next)?;
        *state = next;
        Ok(value)
    }
}

impl TaskStore for JsonTaskStore {
    fn enqueue(&self, task: NewTask) -> Result<Enqueued, StoreError> {
        let key = task.key();
        self.write(|snap| {
            if let Some(existing) = snap.tasks.iter().find(|t| t.is_active() && t.key() == key) {
                tracing::debug!(task_id = existing.id(), repo = %key.repo, number = key.number, "already queued");
                return Ok(Enqueued {
                    id: existing.id(),
                    created: false,
                });
            }
            let id = snap.next_id;
            snap.next_id += 1;
            snap.tasks.push(Task::new(id, task, Utc::now()));
            tracing::info!(task_id = id, kind = %key.kind, repo = %key.repo, number = key.number, "task enqueued");
            Ok(Enqueued { id, created: true })
        })
    }

    fn claim_pending(&self, kind: TaskKind, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.read(|snap| {
            snap.tasks
                .iter()
                .filter(|t| t.kind() == kind && t.status() == TaskStatus::Pending)
                .take(limit)
                .cloned()
                .collect()
        })
    }

    fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        self.write(|snap| {
            if transition == Transition::Reset {
                let key = snap.find_mut(id)?.key();
                if let Some(active) = snap
                    .tasks
                    .iter()
                    .find(|t| t.id() != id && t.is_active() && t.key() == key)
                {
                    return Err(StoreError::DuplicateActive {
                        id,
                        active: active.id(),
                    });
                }
            }
            let task = snap.find_mut(id)?;
            task.apply(transition, Utc::now())?;
            tracing::debug!(task_id = id, status = %task.status(), "task transitioned");
            Ok(task.clone())
        })
    }

    fn increment_attempts(&self, id: TaskId) -> Result<u32, StoreError> {
        self.write(|snap| Ok(snap.find_mut(id)?.bump_attempts(Utc::now())))
    }

    fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.read(|snap| snap.tasks.iter().find(|t| t.id() == id).cloned())?
            .ok_or(StoreError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.read(|snap| snap.tasks.clone())
    }

    fn find_latest(
        &self,
        kind: TaskKind,
        repo: &str,
        number: u64,
    ) -> Result<Option<Task>, StoreError> {
        self.read(|snap| {
            snap.tasks
                .iter()
                .rev()
                .find(|t| t.kind() == kind && t.repo() == repo && t.number() == number)
                .cloned()
        })
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn load(path: &Path) -> Result<Snapshot, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(Snapshot::default());
    }
    serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn persist(backing: &Backing, snapshot: &Snapshot) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(snapshot).map_err(|e| StoreError::Corrupt {
        path: backing.path.clone(),
        message: e.to_string(),
    })?;
    let tmp = &backing.tmp_path;
    let mut file = File::create(tmp).map_err(|e| StoreError::io(tmp, e))?;
    file.write_all(&json).map_err(|e| StoreError::io(tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(tmp, e))?;
    drop(file);
    fs::rename(tmp, &backing.path).map_err(|e| StoreError::io(&backing.path, e))?;
    if let Some(parent) = backing.path.parent() {
        sync_dir(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

/// Make a rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
