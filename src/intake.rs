//! Webhook intake: signature verification and routing of GitHub events into
//! the task store.

use anyhow::Context;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StoreError;
use crate::queue::{IssueTask, NewTask, PrReviewTask, TaskId, TaskKind, TaskStore};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `payload`, formatted like the `X-Hub-Signature-256` header.
pub fn sign(secret: &str, payload: &[u8]) -> anyhow::Result<String> {
    let mut mac = keyed_mac(secret)?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn keyed_mac(secret: &str) -> anyhow::Result<HmacSha256> {
    <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook secret: {e}"))
}

/// Check a `sha256=<hex>` signature header in constant time.
///
/// With no secret configured every payload is accepted.
pub fn verify_signature(secret: Option<&str>, payload: &[u8], header: Option<&str>) -> bool {
    let Some(secret) = secret else {
        tracing::warn!("no webhook secret configured, skipping signature verification");
        return true;
    };
    let Some(expected) = header
        .and_then(|h| h.trim().strip_prefix("sha256="))
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };
    let Ok(mut mac) = keyed_mac(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// What intake did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntakeOutcome {
    Queued { task_id: TaskId, message: String },
    AlreadyQueued { task_id: TaskId, message: String },
    Requeued { task_id: TaskId, message: String },
    Ignored { reason: String },
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    action: String,
    repository: Option<Repository>,
    installation: Option<Installation>,
    issue: Option<Issue>,
    comment: Option<Comment>,
    pull_request: Option<PullRequest>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    #[serde(default)]
    files: Vec<PullRequestFile>,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
}

fn ignored(reason: impl Into<String>) -> IntakeOutcome {
    IntakeOutcome::Ignored {
        reason: reason.into(),
    }
}

/// Route one webhook delivery. `event` is the `X-GitHub-Event` header.
pub fn handle_event(
    store: &dyn TaskStore,
    mentions: &[String],
    event: &str,
    payload: &[u8],
) -> anyhow::Result<IntakeOutcome> {
    let payload: Payload =
        serde_json::from_slice(payload).context("parsing webhook payload")?;
    let action = payload.action.as_str();
    tracing::info!(event, action, "webhook received");

    let Some(repo) = payload.repository.as_ref().map(|r| r.full_name.clone()) else {
        return Ok(ignored("payload has no repository"));
    };
    let installation_id = payload.installation.as_ref().map(|i| i.id);

    match event {
        "issues" if matches!(action, "opened" | "reopened") => {
            let Some(issue) = payload.issue else {
                return Ok(ignored("issues event without issue"));
            };
            let number = issue.number;
            let enqueued = store.enqueue(NewTask::Issue(IssueTask {
                repo,
                issue_number: number,
                title: issue.title,
                body: issue.body.unwrap_or_default(),
                installation_id,
            }))?;
            Ok(if enqueued.created {
                IntakeOutcome::Queued {
                    task_id: enqueued.id,
                    message: format!("Issue #{number} queued for processing"),
                }
            } else {
                IntakeOutcome::AlreadyQueued {
                    task_id: enqueued.id,
                    message: format!("Issue #{number} is already queued"),
                }
            })
        }
        "issue_comment" if action == "created" => {
            let body = payload
                .comment
                .and_then(|c| c.body)
                .unwrap_or_default()
                .to_lowercase();
            if !mentions.iter().any(|m| body.contains(&m.to_lowercase())) {
                return Ok(ignored("comment does not mention the agent"));
            }
            let Some(issue) = payload.issue else {
                return Ok(ignored("comment event without issue"));
            };
            requeue_issue(store, repo, issue, installation_id)
        }
        "pull_request" if matches!(action, "opened" | "synchronize" | "reopened") => {
            let Some(pr) = payload.pull_request else {
                return Ok(ignored("pull_request event without pull_request"));
            };
            let number = pr.number;
            let changed_files = pr.files.into_iter().map(|f| f.filename).collect();
            let enqueued = store.enqueue(NewTask::PrReview(PrReviewTask {
                repo,
                pr_number: number,
                changed_files,
                installation_id,
            }))?;
            Ok(if enqueued.created {
                IntakeOutcome::Queued {
                    task_id: enqueued.id,
                    message: format!("PR #{number} queued for review"),
                }
            } else {
                IntakeOutcome::AlreadyQueued {
                    task_id: enqueued.id,
                    message: format!("PR #{number} review is already queued"),
                }
            })
        }
        _ => Ok(ignored(format!("unhandled event {event}/{action}"))),
    }
}

/// A mention on an issue: reset a finished task, keep an active one, or queue a new one.
fn requeue_issue(
    store: &dyn TaskStore,
    repo: String,
    issue: Issue,
    installation_id: Option<u64>,
) -> anyhow::Result<IntakeOutcome> {
    let number = issue.number;
    match store.find_latest(TaskKind::Issue, &repo, number)? {
        Some(task) if task.is_active() => Ok(IntakeOutcome::AlreadyQueued {
            task_id: task.id(),
            message: format!("Issue #{number} is already queued"),
        }),
        Some(task) => match store.reset_to_pending(task.id()) {
            Ok(_) => {
                tracing::info!(task_id = task.id(), repo = %repo, number, "issue requeued");
                Ok(IntakeOutcome::Requeued {
                    task_id: task.id(),
                    message: format!("Issue #{number} requeued for processing"),
                })
            }
            Err(StoreError::DuplicateActive { active, .. }) => Ok(IntakeOutcome::AlreadyQueued {
                task_id: active,
                message: format!("Issue #{number} is already queued"),
            }),
            Err(e) => Err(e.into()),
        },
        None => {
            let enqueued = store.enqueue(NewTask::Issue(IssueTask {
                repo,
                issue_number: number,
                title: issue.title,
                body: issue.body.unwrap_or_default(),
                installation_id,
            }))?;
            Ok(IntakeOutcome::Queued {
                task_id: enqueued.id,
                message: format!("Issue #{number} queued for processing"),
            })
        }
    }
}
