use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

/// Command isolated from the caller's config, secrets and store overrides.
fn agent(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("coding-agent").unwrap();
    cmd.current_dir(root)
        .env("HOME", root)
        .env("XDG_CONFIG_HOME", root.join("xdg"))
        .env_remove("GITHUB_WEBHOOK_SECRET")
        .env_remove("GITHUB_TOKEN")
        .env_remove("OPENAI_API_KEY")
        .env_remove("CODING_AGENT_STORE")
        .env_remove("REPOS_DIR")
        .env_remove("WORKER_INTERVAL")
        .env_remove("MAX_ATTEMPTS")
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT");
    cmd
}

#[test]
fn add_issue_dedupes_and_lists() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .args(["queue", "add-issue", "octo/demo", "5", "--title", "Crash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queued issue octo/demo#5 as task 1"));
    agent(dir.path())
        .args(["queue", "add-issue", "octo/demo", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already queued as task 1"));

    assert!(dir.path().join(".coding-agent/tasks.json").exists());

    agent(dir.path())
        .args(["queue", "list", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1  issue  octo/demo#5  pending  attempts=0"));
    agent(dir.path())
        .args(["queue", "list", "--format", "json", "--kind", "pr-review"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn stats_and_status_report_counts() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .args(["queue", "add-pr", "octo/demo", "9", "--files", "a.py,b.py"])
        .assert()
        .success();

    agent(dir.path())
        .args(["queue", "stats", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reviews  pending=1"));

    let output = agent(dir.path())
        .args(["status", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["stats"]["reviews"]["pending"], 1);
    assert_eq!(report["recent"][0]["work"]["review"]["changed_files"][1], "b.py");
}

#[test]
fn invalid_repo_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .args(["queue", "add-issue", "not-a-repo", "1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("owner/name"));
}

#[test]
fn reset_unknown_task_fails() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .args(["queue", "reset", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task 99 not found"));
}

#[test]
fn signed_webhook_is_queued() {
    let dir = tempfile::tempdir().unwrap();
    let payload = serde_json::json!({
        "action": "opened",
        "repository": { "full_name": "octo/demo" },
        "installation": { "id": 4 },
        "issue": { "number": 21, "title": "Off by one", "body": "in `lib/range.py`" }
    })
    .to_string();
    let payload_path = dir.path().join("payload.json");
    std::fs::write(&payload_path, &payload).unwrap();
    let signature = coding_agent::intake::sign("hush", payload.as_bytes()).unwrap();

    agent(dir.path())
        .env("GITHUB_WEBHOOK_SECRET", "hush")
        .args(["webhook", "--event", "issues", "--payload"])
        .arg(&payload_path)
        .args(["--signature", &signature])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status":"queued""#));

    agent(dir.path())
        .args(["queue", "list", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("octo/demo#21  pending"));
}

#[test]
fn bad_signature_exits_with_dedicated_code() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .env("GITHUB_WEBHOOK_SECRET", "hush")
        .args(["webhook", "--event", "issues", "--signature", "sha256=00"])
        .write_stdin(r#"{"action":"opened"}"#)
        .assert()
        .code(6)
        .stderr(predicate::str::contains("invalid webhook signature"));
}

#[test]
fn webhook_from_stdin_without_secret() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .args(["webhook", "--event", "ping"])
        .write_stdin(r#"{"zen":"hi","repository":{"full_name":"octo/demo"}}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status":"ignored""#));
}

#[test]
fn init_writes_config_once() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .args(["init", "--no-interactive", "--interval", "15"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated .coding-agent.toml"));
    let written = std::fs::read_to_string(dir.path().join(".coding-agent.toml")).unwrap();
    assert!(written.contains("interval = 15"));

    agent(dir.path())
        .args(["init", "--no-interactive"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn config_store_path_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".coding-agent.toml"),
        "[paths]\nstore = \"state/queue.json\"\n",
    )
    .unwrap();
    agent(dir.path())
        .args(["queue", "add-issue", "octo/demo", "1"])
        .assert()
        .success();
    assert!(dir.path().join("state/queue.json").exists());
}

#[test]
fn malformed_config_is_exit_code_two() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".coding-agent.toml"), "[worker\n").unwrap();
    agent(dir.path())
        .args(["queue", "stats"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid .coding-agent.toml"));
}

#[test]
fn schema_describes_config_sections() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"worker\"").and(predicate::str::contains("\"github\"")));
}

#[test]
fn single_scan_on_empty_queue() {
    let dir = tempfile::tempdir().unwrap();
    agent(dir.path())
        .args(["run", "all", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("issue  processed=0"))
        .stdout(predicate::str::contains("pr_review  processed=0"));
}
