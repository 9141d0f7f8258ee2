//! CLI integration tests.
//!
//! These run the built binary and cover everything that works without a
//! backend: help, version and configuration handling.

use std::path::Path;
use std::process::{Command, Output};

fn run_helmwatch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_helmwatch"))
        .args(args)
        .env_remove("HELMWATCH_CONFIG")
        .env_remove("HELMWATCH_BASE_URL")
        .env_remove("HELMWATCH_PUSH_URL")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run helmwatch binary")
}

fn run_with_config(config: &Path, args: &[&str]) -> Output {
    let config = config.to_str().expect("utf-8 temp path");
    let mut full = vec!["--config", config];
    full.extend_from_slice(args);
    run_helmwatch(&full)
}

// =============================================================================
// Help and Version
// =============================================================================

#[test]
fn test_help_command() {
    let output = run_helmwatch(&["--help"]);
    assert!(output.status.success(), "Help should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["watch", "status", "sos", "send-device-data", "config"] {
        assert!(stdout.contains(command), "Help should list {}", command);
    }
}

#[test]
fn test_version_command() {
    let output = run_helmwatch(&["--version"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_watch_help_mentions_cancel() {
    let output = run_helmwatch(&["watch", "--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("cancel"));
}

#[test]
fn test_unknown_command_fails() {
    let output = run_helmwatch(&["launch"]);
    assert!(!output.status.success());
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_config_path_honors_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");

    let output = run_with_config(&path, &["config", "path"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("custom.toml"));
}

#[test]
fn test_config_init_then_validate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let output = run_with_config(&path, &["config", "init"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(path.exists());

    let output = run_with_config(&path, &["config", "validate"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Configuration OK"));

    // A second init must not clobber the file
    let output = run_with_config(&path, &["config", "init"]);
    assert!(!output.status.success());
}

#[test]
fn test_config_validate_reports_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[backend]
base_url = "ftp://example.com"

[monitor]
countdown_secs = 900
poll_interval_secs = 0
"#,
    )
    .unwrap();

    let output = run_with_config(&path, &["config", "validate"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("backend.base_url"), "stderr: {}", stderr);
    assert!(stderr.contains("monitor.countdown_secs"), "stderr: {}", stderr);
    assert!(stderr.contains("monitor.poll_interval_secs"), "stderr: {}", stderr);
}

#[test]
fn test_config_show_json_applies_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[monitor]\ncountdown_secs = 15\n").unwrap();

    let output = run_with_config(
        &path,
        &[
            "--json",
            "--push-url",
            "ws://localhost:9000/push",
            "config",
            "show",
        ],
    );
    assert!(output.status.success());

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("config show --json emits JSON");
    assert_eq!(json["monitor"]["countdown_secs"], 15);
    assert_eq!(json["push"]["url"], "ws://localhost:9000/push");
    assert_eq!(
        json["backend"]["base_url"],
        "https://smart-helmet-server-ebon.vercel.app/api"
    );
}

#[test]
fn test_invalid_config_blocks_network_commands() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[push]\nurl = \"http://wrong-scheme\"\n").unwrap();

    let output = run_with_config(&path, &["status"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("push.url"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_with_config(&dir.path().join("absent.toml"), &["config", "show"]);
    assert!(!output.status.success());
}

#[test]
fn test_sos_requires_yes_without_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[backend]\nbase_url = \"http://127.0.0.1:9/api\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_helmwatch"))
        .args(["--config", path.to_str().unwrap(), "sos"])
        .stdin(std::process::Stdio::null())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--yes"));
}
