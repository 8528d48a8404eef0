use coding_agent::intake::{self, IntakeOutcome};
use coding_agent::queue::{
    FileReview, JsonTaskStore, ReviewOutcome, TaskKind, TaskStatus, TaskStore, Transition,
};

fn mentions() -> Vec<String> {
    vec!["@coding-agent".to_string()]
}

#[test]
fn issue_task_survives_restart_and_requeue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");

    let id = {
        let store = JsonTaskStore::open(&path).unwrap();
        let id = store.enqueue_issue("octo/demo", 3, "Crash", "boom").unwrap();
        let claimed = store.claim_pending(TaskKind::Issue, 5).unwrap();
        assert_eq!(claimed.len(), 1);
        // Claiming does not change status.
        assert_eq!(claimed[0].status(), TaskStatus::Pending);
        assert_eq!(store.increment_attempts(id).unwrap(), 1);
        store.transition(id, Transition::Claim).unwrap();
        id
    };

    // Crash while in progress: the attempt is still counted after reopening.
    let store = JsonTaskStore::open(&path).unwrap();
    let task = store.get(id).unwrap();
    assert_eq!(task.status(), TaskStatus::InProgress);
    assert_eq!(task.attempts(), 1);
    assert!(store.claim_pending(TaskKind::Issue, 5).unwrap().is_empty());

    store
        .transition(id, Transition::Fail("push rejected".into()))
        .unwrap();

    let comment = serde_json::json!({
        "action": "created",
        "repository": { "full_name": "octo/demo" },
        "issue": { "number": 3, "title": "Crash" },
        "comment": { "body": "@coding-agent try again" }
    })
    .to_string();
    let outcome =
        intake::handle_event(&store, &mentions(), "issue_comment", comment.as_bytes()).unwrap();
    assert!(matches!(outcome, IntakeOutcome::Requeued { task_id, .. } if task_id == id));

    let task = store.get(id).unwrap();
    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(task.attempts(), 0);
    assert!(task.error().is_none());
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn review_outcome_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    let store = JsonTaskStore::open(&path).unwrap();

    let id = store
        .enqueue_pr_review("octo/demo", 40, &["a.py".to_string()])
        .unwrap();
    store.transition(id, Transition::Claim).unwrap();
    let outcome = ReviewOutcome::from_files(vec![
        FileReview {
            file: "a.py".into(),
            passed: true,
            notes: "ok".into(),
        },
        FileReview {
            file: "b.py".into(),
            passed: false,
            notes: "still broken".into(),
        },
    ]);
    let stored = store.transition(id, Transition::Review(outcome)).unwrap();
    assert_eq!(stored.status(), TaskStatus::Rejected);

    let reopened = JsonTaskStore::open(&path).unwrap();
    let task = reopened.get(id).unwrap();
    let result = task.review_outcome().unwrap();
    assert!(!result.all_passed);
    assert_eq!(result.files[1].notes, "still broken");

    let stats = reopened.stats().unwrap();
    assert_eq!(stats.reviews.rejected, 1);
    assert_eq!(stats.issues.total(), 0);

    // A terminal review does not block a fresh one for new commits.
    let again = reopened.enqueue_pr_review("octo/demo", 40, &[]).unwrap();
    assert_ne!(again, id);
}

#[test]
fn completed_task_rejects_further_transitions() {
    let store = JsonTaskStore::in_memory();
    let id = store.enqueue_issue("octo/demo", 1, "t", "").unwrap();
    store.transition(id, Transition::Claim).unwrap();
    store
        .transition(id, Transition::Complete { pr_number: 2 })
        .unwrap();
    assert!(store.transition(id, Transition::Claim).is_err());
    assert_eq!(store.get(id).unwrap().pr_number(), Some(2));
}
