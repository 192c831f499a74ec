//! CLI contract tests: subcommands against a temporary database.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::{json, Value};

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    let config = format!(
        r#"
[store]
database = "{}"

[worker]
retry_delay_ms = 1

[[bots]]
id = "NewsBot"
"#,
        dir.join("hg.db").display()
    );
    fs::write(&path, config).expect("config should be written");
    path
}

fn hg(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hg").expect("binary should build");
    cmd.arg("--config")
        .arg(config)
        .env("API_AI_CLIENT_ACCESS_TOKEN", "test-token")
        .env_remove("CHATBASE_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let output = Command::cargo_bin("hg")
        .expect("binary should build")
        .arg("--help")
        .output()
        .expect("hg should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["enqueue", "drain", "depth"] {
        assert!(stdout.contains(sub), "help should mention {sub}");
    }
}

#[test]
fn depth_of_fresh_queue_is_zero() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = write_config(tmp.path());

    let output = hg(&config)
        .args(["depth", "--bot", "NewsBot", "--user", "u1", "--kind", "message"])
        .output()
        .expect("hg should run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0");
}

#[test]
fn enqueue_postback_prints_dispatched_request() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = write_config(tmp.path());
    let event_path = tmp.path().join("event.json");
    let event = json!({
        "sender": {"id": "u1"},
        "recipient": {"id": "page"},
        "postback": {"payload": r#"{"action":"subscribe","params":{"topic":"tech","note":""}}"#},
    });
    fs::write(&event_path, event.to_string()).expect("event should be written");

    let output = hg(&config)
        .args(["enqueue", "--bot", "NewsBot", "--kind", "postback"])
        .arg(&event_path)
        .output()
        .expect("hg should run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one request should be printed");
    let request: Value = serde_json::from_str(line).expect("request should be json");
    assert_eq!(request["action"], json!("subscribe"));
    assert_eq!(request["parameters"], json!({"topic": "tech"}));
    assert_eq!(request["user"]["namespace"], json!("news_bots"));

    let depth = hg(&config)
        .args(["depth", "--bot", "NewsBot", "--user", "u1", "--kind", "postback"])
        .output()
        .expect("hg should run");
    assert_eq!(String::from_utf8_lossy(&depth.stdout).trim(), "0");
}

#[test]
fn unknown_bot_fails() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = write_config(tmp.path());

    let output = hg(&config)
        .args(["depth", "--bot", "Ghost", "--user", "u1", "--kind", "message"])
        .output()
        .expect("hg should run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Ghost"));
}

#[test]
fn invalid_kind_is_rejected_by_argument_parsing() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let config = write_config(tmp.path());

    let output = hg(&config)
        .args(["depth", "--bot", "NewsBot", "--user", "u1", "--kind", "read"])
        .output()
        .expect("hg should run");
    assert!(!output.status.success());
}

#[test]
fn missing_config_file_is_reported() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = hg(&tmp.path().join("absent.toml"))
        .args(["depth", "--bot", "NewsBot", "--user", "u1", "--kind", "message"])
        .output()
        .expect("hg should run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load"));
}
