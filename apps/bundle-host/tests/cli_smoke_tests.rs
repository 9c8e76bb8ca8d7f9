#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the bundle-host binary
//!
//! These run the real binary with the linked bundles and check its console output.

use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Helper to run the bundle-host binary with given arguments
fn run_bundle_host(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bundle-host"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute bundle-host")
}

fn write_config(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, content).expect("Failed to write config file");
    path.to_str().unwrap().to_owned()
}

fn line_index(stdout: &str, line: &str) -> usize {
    stdout
        .lines()
        .position(|l| l == line)
        .unwrap_or_else(|| panic!("missing line {line:?} in:\n{stdout}"))
}

#[test]
fn test_cli_help_command() {
    let output = run_bundle_host(&["--help"]);
    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"), "Should contain usage information");
    assert!(stdout.contains("run"), "Should contain 'run' subcommand");
    assert!(stdout.contains("check"), "Should contain 'check' subcommand");
    assert!(stdout.contains("list"), "Should contain 'list' subcommand");
    assert!(stdout.contains("--config"), "Should mention config option");
}

#[test]
fn test_cli_version_command() {
    let output = run_bundle_host(&["--version"]);
    assert!(output.status.success(), "Version command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("bundle-host"), "Should contain binary name");
    assert!(
        stdout.chars().any(|c| c.is_ascii_digit()),
        "Should contain version numbers"
    );
}

#[test]
fn test_cli_invalid_command() {
    let output = run_bundle_host(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"), "Should report the bad subcommand: {stderr}");
}

#[test]
fn test_cli_missing_config_file() {
    let output = run_bundle_host(&["--config", "/nonexistent/config.yaml", "check"]);
    assert!(!output.status.success(), "Should fail when config file doesn't exist");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("does not exist"),
        "Should indicate config file not found: {stderr}"
    );
}

#[test]
fn test_cli_invalid_yaml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "logging: [unclosed");

    let output = run_bundle_host(&["--config", &path, "check"]);
    assert!(!output.status.success(), "Should fail with invalid YAML");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to load configuration"),
        "Should mention the load failure: {stderr}"
    );
}

#[test]
fn test_cli_check_valid_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r"
logging:
  level: warn
bundles:
  greeter-client:
    config:
      name: Jane
",
    );

    let output = run_bundle_host(&["--config", &path, "check"]);
    assert!(
        output.status.success(),
        "Should succeed with valid config: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration is valid"), "{stdout}");
    assert!(stdout.contains("greeter-provider"), "{stdout}");
    assert!(stdout.contains("hello-world"), "{stdout}");
}

#[test]
fn test_cli_list_shows_linked_bundles() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "bundles:\n  hello-world:\n    enabled: false\n");

    let output = run_bundle_host(&["--config", &path, "list"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("greeter-client"), "{stdout}");
    assert!(stdout.contains("greeter-provider"), "{stdout}");
    assert!(stdout.contains("hello-world 0.1.0 (disabled)"), "{stdout}");
}

#[test]
fn test_cli_print_config() {
    let output = run_bundle_host(&["--print-config", "-vv"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Effective configuration:"), "{stdout}");
    assert!(stdout.contains("level: debug"), "{stdout}");
}

#[test]
fn test_cli_run_once_greets_and_says_goodbye() {
    let output = run_bundle_host(&["run", "--once"]);
    assert!(
        output.status.success(),
        "run --once should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let registered = line_index(&stdout, "Registering service.");
    let greeted = line_index(&stdout, "Hello John");
    let hello = line_index(&stdout, "Hello world.");
    let unregistered = line_index(&stdout, "Notification of service unregistered.");
    let goodbye = line_index(&stdout, "Goodbye world.");

    assert!(registered < greeted, "{stdout}");
    assert!(hello < goodbye, "{stdout}");
    assert!(greeted < unregistered, "{stdout}");
}

#[test]
fn test_cli_run_once_with_disabled_provider_never_greets() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "bundles:\n  greeter-provider:\n    enabled: false\n");

    let output = run_bundle_host(&["--config", &path, "run", "--once"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("Hello John"), "{stdout}");
    assert!(stdout.contains("Hello world."), "{stdout}");
    assert!(stdout.contains("Goodbye world."), "{stdout}");
}

#[test]
fn test_cli_sample_config_runs() {
    let sample = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/bundle-host.yaml");

    let output = run_bundle_host(&["--config", sample, "run", "--once"]);
    assert!(
        output.status.success(),
        "Sample config should run: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Hello John"), "{stdout}");
}
