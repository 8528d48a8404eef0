//! Task records and their lifecycle.
//!
//! Each task kind carries its own closed status enum. Status only changes
//! through [`Transition`], which rejects jumps the lifecycle does not allow.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Stable task identifier, assigned at insertion and never reused.
pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Issue,
    PrReview,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Issue => "issue",
            TaskKind::PrReview => "pr_review",
        })
    }
}

/// Lifecycle of an issue-fix task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Lifecycle of a PR-review task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Failed,
}

/// Kind-independent view of a task's status, for stats and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Approved,
    Rejected,
    Failed,
}

impl TaskStatus {
    /// Pending and in-progress tasks are "active": at most one per key.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<IssueStatus> for TaskStatus {
    fn from(status: IssueStatus) -> Self {
        match status {
            IssueStatus::Pending => TaskStatus::Pending,
            IssueStatus::InProgress => TaskStatus::InProgress,
            IssueStatus::Completed => TaskStatus::Completed,
            IssueStatus::Failed => TaskStatus::Failed,
        }
    }
}

impl From<ReviewStatus> for TaskStatus {
    fn from(status: ReviewStatus) -> Self {
        match status {
            ReviewStatus::Pending => TaskStatus::Pending,
            ReviewStatus::InProgress => TaskStatus::InProgress,
            ReviewStatus::Approved => TaskStatus::Approved,
            ReviewStatus::Rejected => TaskStatus::Rejected,
            ReviewStatus::Failed => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTask {
    pub repo: String,
    pub issue_number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub installation_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrReviewTask {
    pub repo: String,
    pub pr_number: u64,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub installation_id: Option<u64>,
}

/// Review verdict for one file of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReview {
    pub file: String,
    pub passed: bool,
    pub notes: String,
}

/// Aggregate review verdict. `all_passed` is vacuously true for zero files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub files: Vec<FileReview>,
    pub all_passed: bool,
}

impl ReviewOutcome {
    pub fn from_files(files: Vec<FileReview>) -> Self {
        let all_passed = files.iter().all(|f| f.passed);
        Self { files, all_passed }
    }
}

/// Kind-specific part of a task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Work {
    Issue {
        issue: IssueTask,
        status: IssueStatus,
        #[serde(default)]
        pr_number: Option<u64>,
    },
    PrReview {
        review: PrReviewTask,
        status: ReviewStatus,
        #[serde(default)]
        result: Option<ReviewOutcome>,
    },
}

/// Uniqueness key: (kind, repo, issue or PR number).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub kind: TaskKind,
    pub repo: String,
    pub number: u64,
}

/// Payload for a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewTask {
    Issue(IssueTask),
    PrReview(PrReviewTask),
}

impl NewTask {
    pub fn key(&self) -> TaskKey {
        match self {
            NewTask::Issue(issue) => TaskKey {
                kind: TaskKind::Issue,
                repo: issue.repo.clone(),
                number: issue.issue_number,
            },
            NewTask::PrReview(review) => TaskKey {
                kind: TaskKind::PrReview,
                repo: review.repo.clone(),
                number: review.pr_number,
            },
        }
    }
}

/// A requested status change plus the fields it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// PENDING -> IN_PROGRESS.
    Claim,
    /// Issue task IN_PROGRESS -> COMPLETED with the opened PR.
    Complete { pr_number: u64 },
    /// Review task IN_PROGRESS -> APPROVED or REJECTED depending on `all_passed`.
    Review(ReviewOutcome),
    /// Any active status -> FAILED.
    Fail(String),
    /// Any status -> PENDING, clearing error, result and attempts.
    Reset,
}

/// A persisted unit of queued work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    work: Work,
}

impl Task {
    pub(crate) fn new(id: TaskId, task: NewTask, now: DateTime<Utc>) -> Self {
        let work = match task {
            NewTask::Issue(issue) => Work::Issue {
                issue,
                status: IssueStatus::Pending,
                pr_number: None,
            },
            NewTask::PrReview(review) => Work::PrReview {
                review,
                status: ReviewStatus::Pending,
                result: None,
            },
        };
        Self {
            id,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
            work,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn kind(&self) -> TaskKind {
        match self.work {
            Work::Issue { .. } => TaskKind::Issue,
            Work::PrReview { .. } => TaskKind::PrReview,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self.work {
            Work::Issue { status, .. } => status.into(),
            Work::PrReview { status, .. } => status.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn repo(&self) -> &str {
        match &self.work {
            Work::Issue { issue, .. } => &issue.repo,
            Work::PrReview { review, .. } => &review.repo,
        }
    }

    /// Issue number for issue tasks, PR number for review tasks.
    pub fn number(&self) -> u64 {
        match &self.work {
            Work::Issue { issue, .. } => issue.issue_number,
            Work::PrReview { review, .. } => review.pr_number,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            kind: self.kind(),
            repo: self.repo().to_string(),
            number: self.number(),
        }
    }

    pub fn as_issue(&self) -> Option<&IssueTask> {
        match &self.work {
            Work::Issue { issue, .. } => Some(issue),
            Work::PrReview { .. } => None,
        }
    }

    pub fn as_review(&self) -> Option<&PrReviewTask> {
        match &self.work {
            Work::PrReview { review, .. } => Some(review),
            Work::Issue { .. } => None,
        }
    }

    /// PR opened for a completed issue task.
    pub fn pr_number(&self) -> Option<u64> {
        match &self.work {
            Work::Issue { pr_number, .. } => *pr_number,
            Work::PrReview { .. } => None,
        }
    }

    pub fn review_outcome(&self) -> Option<&ReviewOutcome> {
        match &self.work {
            Work::PrReview { result, .. } => result.as_ref(),
            Work::Issue { .. } => None,
        }
    }

    pub(crate) fn bump_attempts(&mut self, now: DateTime<Utc>) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.touch(now);
        self.attempts
    }

    /// Apply a transition, rejecting jumps the lifecycle does not allow.
    pub(crate) fn apply(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = self.id;
        let from = self.status();
        let kind = self.kind();
        let invalid = |to: TaskStatus| StoreError::InvalidTransition { id, from, to };

        match transition {
            Transition::Claim => {
                if from != TaskStatus::Pending {
                    return Err(invalid(TaskStatus::InProgress));
                }
                match &mut self.work {
                    Work::Issue { status, .. } => *status = IssueStatus::InProgress,
                    Work::PrReview { status, .. } => *status = ReviewStatus::InProgress,
                }
            }
            Transition::Complete { pr_number: number } => {
                let Work::Issue {
                    status, pr_number, ..
                } = &mut self.work
                else {
                    return Err(StoreError::KindMismatch {
                        id,
                        expected: TaskKind::Issue,
                        actual: kind,
                    });
                };
                if *status != IssueStatus::InProgress {
                    return Err(invalid(TaskStatus::Completed));
                }
                *status = IssueStatus::Completed;
                *pr_number = Some(number);
                self.error = None;
            }
            Transition::Review(outcome) => {
                let Work::PrReview { status, result, .. } = &mut self.work else {
                    return Err(StoreError::KindMismatch {
                        id,
                        expected: TaskKind::PrReview,
                        actual: kind,
                    });
                };
                let next = if outcome.all_passed {
                    ReviewStatus::Approved
                } else {
                    ReviewStatus::Rejected
                };
                if *status != ReviewStatus::InProgress {
                    return Err(invalid(next.into()));
                }
                *status = next;
                *result = Some(outcome);
                self.error = None;
            }
            Transition::Fail(message) => {
                if !from.is_active() {
                    return Err(invalid(TaskStatus::Failed));
                }
                match &mut self.work {
                    Work::Issue { status, .. } => *status = IssueStatus::Failed,
                    Work::PrReview { status, .. } => *status = ReviewStatus::Failed,
                }
                self.error = Some(message);
            }
            Transition::Reset => {
                match &mut self.work {
                    Work::Issue {
                        status, pr_number, ..
                    } => {
                        *status = IssueStatus::Pending;
                        *pr_number = None;
                    }
                    Work::PrReview { status, result, .. } => {
                        *status = ReviewStatus::Pending;
                        *result = None;
                    }
                }
                self.error = None;
                self.attempts = 0;
            }
        }

        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issue_task() -> Task {
        Task::new(
            1,
            NewTask::Issue(IssueTask {
                repo: "octo/demo".into(),
                issue_number: 12,
                title: "Crash on empty list".into(),
                body: String::new(),
                installation_id: None,
            }),
            Utc::now(),
        )
    }

    fn review_task() -> Task {
        Task::new(
            2,
            NewTask::PrReview(PrReviewTask {
                repo: "octo/demo".into(),
                pr_number: 40,
                changed_files: vec!["a.py".into()],
                installation_id: Some(9),
            }),
            Utc::now(),
        )
    }

    #[test]
    fn new_task_is_pending_with_zero_attempts() {
        let task = issue_task();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.attempts(), 0);
        assert!(task.is_active());
        assert_eq!(task.created_at(), task.updated_at());
    }

    #[test]
    fn issue_happy_path() {
        let mut task = issue_task();
        task.apply(Transition::Claim, Utc::now()).unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);
        task.apply(Transition::Complete { pr_number: 77 }, Utc::now())
            .unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.pr_number(), Some(77));
        assert!(!task.is_active());
    }

    #[test]
    fn complete_requires_claim() {
        let mut task = issue_task();
        let err = task
            .apply(Transition::Complete { pr_number: 1 }, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn review_transition_rejected_on_issue_task() {
        let mut task = issue_task();
        task.apply(Transition::Claim, Utc::now()).unwrap();
        let err = task
            .apply(
                Transition::Review(ReviewOutcome::from_files(vec![])),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
        assert_eq!(task.status(), TaskStatus::InProgress);
    }

    #[test]
    fn review_outcome_picks_approved_or_rejected() {
        let mut approved = review_task();
        approved.apply(Transition::Claim, Utc::now()).unwrap();
        approved
            .apply(Transition::Review(ReviewOutcome::from_files(vec![])), Utc::now())
            .unwrap();
        assert_eq!(approved.status(), TaskStatus::Approved);

        let mut rejected = review_task();
        rejected.apply(Transition::Claim, Utc::now()).unwrap();
        let outcome = ReviewOutcome::from_files(vec![FileReview {
            file: "a.py".into(),
            passed: false,
            notes: "still divides by zero".into(),
        }]);
        rejected
            .apply(Transition::Review(outcome.clone()), Utc::now())
            .unwrap();
        assert_eq!(rejected.status(), TaskStatus::Rejected);
        assert_eq!(rejected.review_outcome(), Some(&outcome));
    }

    #[test]
    fn terminal_tasks_only_leave_through_reset() {
        let mut task = issue_task();
        task.apply(Transition::Fail("boom".into()), Utc::now())
            .unwrap();
        assert_eq!(task.error(), Some("boom"));
        assert!(task.apply(Transition::Claim, Utc::now()).is_err());
        assert!(task.apply(Transition::Fail("again".into()), Utc::now()).is_err());

        task.bump_attempts(Utc::now());
        task.apply(Transition::Reset, Utc::now()).unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.error(), None);
        assert_eq!(task.attempts(), 0);
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let mut task = issue_task();
        let before = task.updated_at();
        task.apply(Transition::Claim, before - Duration::seconds(30))
            .unwrap();
        assert_eq!(task.updated_at(), before);
    }

    #[test]
    fn empty_review_is_vacuously_passing() {
        assert!(ReviewOutcome::from_files(Vec::new()).all_passed);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let task = review_task();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["work"]["kind"], "pr_review");
        assert_eq!(json["work"]["status"], "pending");
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }
}
