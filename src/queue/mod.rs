//! Work queue: task records, lifecycle transitions, and the durable store.

mod lock;
pub mod store;
pub mod task;

pub use store::{Enqueued, JsonTaskStore, QueueStats, StatusCounts, TaskStore};
pub use task::{
    FileReview, IssueStatus, IssueTask, NewTask, PrReviewTask, ReviewOutcome, ReviewStatus, Task,
    TaskId, TaskKey, TaskKind, TaskStatus, Transition, Work,
};
