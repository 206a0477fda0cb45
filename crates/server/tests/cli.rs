//! CLI tests: run the `reelforge` binary against a temporary database and
//! check exit codes and output. No command here reaches a real backend.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::Utc;
use reelforge_core::job::StateTransition;
use reelforge_core::{Artifact, JobState, JobStore, SqliteJobStore};
use tempfile::TempDir;

const PLAN: &str = r#"
slug = "ep-01"

[[products]]
rank = 1
name = "Crispwave XL"

[[products]]
rank = 2
name = "AirChef Mini"

[[assets]]
type = "product-hero"
rank = 1
backend = "dzine"
model = "flux-pro"
prompt = "hero shot of {product}"

[[assets]]
type = "thumbnail"
backend = "dzine"
model = "flux-pro"
prompt = "thumbnail ranking the best picks"
priority = "blocking"
"#;

const SCORES: &str = r#"
revision = 1
content_accuracy = 95.0
compliance = 95.0
asset_completeness = 95.0
disclosure_present = true
affiliate_links_resolved = true
unsourced_claims = 0
"#;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("reelforge.toml");
        std::fs::write(
            &config,
            format!(
                r#"
[database]
path = {:?}

[storage]
root = {:?}

[[backends]]
name = "dzine"
kind = "browser"
capabilities = ["text-to-image", "image-to-image"]

[backends.browser]
driver_url = "http://127.0.0.1:9"
target_url = "https://example.com/canvas"
"#,
                dir.path().join("reelforge.db"),
                dir.path().join("artifacts"),
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn run(&self, args: &[&str]) -> Output {
        run_with_config(&self.config, args)
    }
}

fn run_with_config(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_reelforge"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .expect("Failed to run reelforge")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

impl Workspace {
    /// Complete every queued dzine job in the database with a persisted
    /// artifact, standing in for a `run` against a live backend.
    fn complete_queued_jobs(&self) -> usize {
        let store = SqliteJobStore::new(&self.dir.path().join("reelforge.db")).unwrap();
        let mut completed = 0;
        while let Some(job) = store.claim_next("dzine", Utc::now(), false).unwrap() {
            let mut artifact = Artifact::new(format!("https://cdn/{}.png", job.id), "dzine");
            artifact.stored_path = Some(
                self.dir
                    .path()
                    .join("artifacts")
                    .join(format!("{}.png", job.id))
                    .to_string_lossy()
                    .to_string(),
            );
            artifact.content_hash = Some("abc".to_string());
            store
                .record(
                    &job.id,
                    StateTransition::to(JobState::Succeeded {
                        artifact,
                        completed_at: Utc::now(),
                        salvaged: false,
                    }),
                )
                .unwrap();
            completed += 1;
        }
        completed
    }
}

/// Enqueue the plan and return the job ids in plan order.
fn enqueue_plan(workspace: &Workspace) -> Vec<String> {
    let plan = workspace.write("plan.toml", PLAN);
    let output = workspace.run(&["enqueue", plan.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "{:?}", output);

    let status = workspace.run(&["status", "--episode", "ep-01", "--json"]);
    let jobs: serde_json::Value = serde_json::from_slice(&status.stdout).unwrap();
    jobs.as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_missing_config_is_operational_error() {
    let dir = TempDir::new().unwrap();

    let output = run_with_config(&dir.path().join("absent.toml"), &["status"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_run_on_empty_queue() {
    let workspace = Workspace::new();

    let output = workspace.run(&["run"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).starts_with("processed 0:"));
}

#[test]
fn test_enqueue_and_status() {
    let workspace = Workspace::new();
    let plan = workspace.write("plan.toml", PLAN);

    let output = workspace.run(&["enqueue", plan.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("episode ep-01: 2 enqueued, 0 already active"));

    // Enqueueing again finds the active jobs
    let again = workspace.run(&["enqueue", plan.to_str().unwrap()]);
    assert!(stdout(&again).contains("episode ep-01: 0 enqueued, 2 already active"));

    let table = workspace.run(&["status"]);
    assert_eq!(table.status.code(), Some(0));
    let text = stdout(&table);
    assert!(text.starts_with("ID"));
    assert_eq!(text.lines().filter(|l| l.contains("queued")).count(), 2);
}

#[test]
fn test_enqueue_invalid_plan() {
    let workspace = Workspace::new();
    let plan = workspace.write(
        "plan.toml",
        &PLAN.replace("backend = \"dzine\"", "backend = \"midjourney\""),
    );

    let output = workspace.run(&["enqueue", plan.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_status_unknown_state() {
    let workspace = Workspace::new();

    let output = workspace.run(&["status", "--state", "exploded"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_cancel_then_retry() {
    let workspace = Workspace::new();
    let ids = enqueue_plan(&workspace);

    let cancelled = workspace.run(&["cancel", &ids[0], "--reason", "wrong angle"]);
    assert_eq!(cancelled.status.code(), Some(0));
    assert!(stdout(&cancelled).contains("cancelled"));

    let listed = workspace.run(&["status", "--state", "cancelled", "--json"]);
    let jobs: serde_json::Value = serde_json::from_slice(&listed.stdout).unwrap();
    assert_eq!(jobs[0]["state"]["cancelled_by"], "cli");
    assert_eq!(jobs[0]["state"]["reason"], "wrong angle");

    let retried = workspace.run(&["retry", &ids[0]]);
    assert_eq!(retried.status.code(), Some(0));
    assert!(stdout(&retried).contains("resubmitted as"));

    // A queued job cannot be force-retried
    let conflict = workspace.run(&["retry", &ids[1]]);
    assert_eq!(conflict.status.code(), Some(2));
}

#[test]
fn test_gate_unregistered_episode() {
    let workspace = Workspace::new();
    let scores = workspace.write("scores.toml", SCORES);

    let output = workspace.run(&["gate", "ep-missing", "--scores", scores.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_gate_fails_without_assets() {
    let workspace = Workspace::new();
    enqueue_plan(&workspace);
    let scores = workspace.write("scores.toml", SCORES);

    let output = workspace.run(&["gate", "ep-01", "--scores", scores.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.starts_with("ep-01 revision 1: FAIL"));
    assert!(text.contains("hard-fail no_publishable_visual"));
    assert_eq!(text.lines().filter(|l| l.contains("missing asset")).count(), 2);
}

#[test]
fn test_gate_passes_with_completed_assets() {
    let workspace = Workspace::new();
    enqueue_plan(&workspace);
    assert_eq!(workspace.complete_queued_jobs(), 2);
    let scores = workspace.write("scores.toml", SCORES);

    let output = workspace.run(&["gate", "ep-01", "--scores", scores.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0), "{:?}", output);
    let text = stdout(&output);
    assert!(text.starts_with("ep-01 revision 1: PASS"));
    assert!(!text.contains("hard-fail"));
    assert!(!text.contains("missing asset"));
}
