//! CLI Integration Tests
//!
//! These tests run the gattscope binary for commands that do not need a
//! Bluetooth adapter. Every test points the config file and the history
//! database into a temporary directory.
//!
//! ```
//! cargo test --package gattscope-cli --test cli_integration
//! ```

use std::path::Path;
use std::process::{Command, Output};

/// Run gattscope with an isolated config and database.
fn run_gattscope(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gattscope"))
        .args(args)
        .env("GATTSCOPE_CONFIG", dir.join("config.toml"))
        .env("GATTSCOPE_DB", dir.join("data.db"))
        .env_remove("GATTSCOPE_DEVICE")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run gattscope binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_command() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["--help"]);

    assert!(output.status.success(), "Help should succeed");
    let stdout = stdout(&output);
    for command in ["scan", "connect", "read", "write", "notify", "history", "config"] {
        assert!(stdout.contains(command), "Help should list {} command", command);
    }
}

#[test]
fn test_version_command() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["--version"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("gattscope"));
}

#[test]
fn test_write_help_mentions_hex() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["write", "--help"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("--hex"));
}

#[test]
fn test_completions_bash() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["completions", "bash"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("gattscope"));
}

// =============================================================================
// Argument Validation
// =============================================================================

#[test]
fn test_unknown_command_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["frobnicate"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_uuid_fails_before_bluetooth() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["read", "battery", "2a19"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid service UUID"));
}

#[test]
fn test_all_conflicts_with_filters() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["scan", "--all", "--name", "Thermo"]);
    assert!(!output.status.success());
}

// =============================================================================
// History
// =============================================================================

#[test]
fn test_history_empty() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["history"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("No devices found"));
    assert!(dir.path().join("data.db").exists());
}

#[test]
fn test_history_export_empty_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["history", "export", "--format", "json"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "[]");
}

#[test]
fn test_history_export_csv_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("history.csv");
    let output = run_gattscope(
        dir.path(),
        &["history", "export", "--format", "csv", "--output", out.to_str().unwrap()],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(out.exists());
}

#[test]
fn test_history_favorite_unknown_device() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["history", "favorite", "AA:BB:CC:DD:EE:FF"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("not in the device history"));
}

#[test]
fn test_history_clear_needs_no_prompt_when_empty() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["history", "clear"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}

#[test]
fn test_connect_without_history_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["connect", "Thermo"]);
    assert!(!output.status.success());
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_path_honours_override() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["config", "path"]);

    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        dir.path().join("config.toml").display().to_string()
    );
}

#[test]
fn test_config_set_and_show() {
    let dir = tempfile::tempdir().unwrap();

    let output = run_gattscope(dir.path(), &["config", "set", "scan_timeout", "7"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = run_gattscope(dir.path(), &["config", "show"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("scan_timeout = 7"));
}

#[test]
fn test_config_set_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_gattscope(dir.path(), &["config", "set", "colour", "red"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unknown key"));
}
