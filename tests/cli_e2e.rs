//! End-to-end CLI tests for the omnifetch binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn write_omnifetch_config(config_home: &std::path::Path, contents: &str) {
    let config_dir = config_home.join("omnifetch");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), contents).unwrap();
}

/// Command isolated from the user's config file.
fn omnifetch(tempdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("omnifetch").unwrap();
    cmd.env("XDG_CONFIG_HOME", tempdir.path().join("xdg-config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage_and_exit_codes() {
    let tempdir = TempDir::new().unwrap();
    omnifetch(&tempdir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fetch many targets at once"))
        .stdout(predicate::str::contains("--on-duplicate"))
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("2 = partial success"));
}

#[test]
fn test_binary_version_displays_version() {
    let tempdir = TempDir::new().unwrap();
    omnifetch(&tempdir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("omnifetch"));
}

#[test]
fn test_binary_empty_stdin_shows_quick_start_examples() {
    let tempdir = TempDir::new().unwrap();
    omnifetch(&tempdir)
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("Received empty stdin input"))
        .stdout(predicate::str::contains("Example: omnifetch"));
}

#[test]
fn test_binary_only_invalid_targets_exits_one() {
    let tempdir = TempDir::new().unwrap();
    let assert = omnifetch(&tempdir)
        .arg("-q")
        .write_stdin("not a target\nstill not a target\n")
        .assert()
        .failure();
    assert_eq!(assert.get_output().status.code(), Some(1));
}

#[test]
fn test_binary_rejects_invalid_concurrency() {
    let tempdir = TempDir::new().unwrap();
    omnifetch(&tempdir)
        .args(["-c", "0", "https://example.com/a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn test_binary_invalid_config_file_is_fatal() {
    let tempdir = TempDir::new().unwrap();
    write_omnifetch_config(&tempdir.path().join("xdg-config"), "concurrency = 0\n");
    let assert = omnifetch(&tempdir)
        .arg("https://example.com/a")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config"));
    assert_eq!(assert.get_output().status.code(), Some(1));
}

#[tokio::test]
async fn test_binary_all_succeeded_exits_zero() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };

    Mock::given(method("GET"))
        .and(path("/one.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"one".to_vec()))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let out = tempdir.path().join("out");
    let assert = omnifetch(&tempdir)
        .arg("--output-dir")
        .arg(&out)
        .arg(format!("{}/one.txt", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 of 1 succeeded"));
    assert_eq!(assert.get_output().status.code(), Some(0));
    assert_eq!(std::fs::read(out.join("one.txt")).unwrap(), b"one");
}

#[tokio::test]
async fn test_binary_partial_success_exits_two() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };

    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PDF".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fail"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let assert = omnifetch(&tempdir)
        .arg("--output-dir")
        .arg(tempdir.path())
        .arg(format!("{}/ok", server.uri()))
        .arg(format!("{}/fail", server.uri()))
        .assert()
        .failure();
    assert_eq!(
        assert.get_output().status.code(),
        Some(2),
        "partial success must yield exit code 2"
    );
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(stdout.contains("1 failed"), "stdout: {stdout}");
    assert!(stdout.contains("/fail"), "stdout: {stdout}");
}

#[tokio::test]
async fn test_binary_complete_failure_exits_one() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let assert = omnifetch(&tempdir)
        .arg("-q")
        .arg("--output-dir")
        .arg(tempdir.path())
        .arg(format!("{}/a", server.uri()))
        .arg(format!("{}/b", server.uri()))
        .assert()
        .failure();
    assert_eq!(assert.get_output().status.code(), Some(1));
}

#[tokio::test]
async fn test_binary_reads_list_file_and_stdin_list() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let list = tempdir.path().join("targets.txt");
    std::fs::write(
        &list,
        format!(
            "# two files\n\"{uri}/first.bin\"\n\n// skipped comment\n{uri}/second.bin\n",
            uri = server.uri()
        ),
    )
    .unwrap();
    let out = tempdir.path().join("from-file");
    omnifetch(&tempdir)
        .arg("-o")
        .arg(&out)
        .arg(&list)
        .assert()
        .success();
    assert!(out.join("first.bin").exists());
    assert!(out.join("second.bin").exists());

    let out = tempdir.path().join("from-stdin");
    omnifetch(&tempdir)
        .arg("-o")
        .arg(&out)
        .write_stdin(format!("{}/third.bin\n", server.uri()))
        .assert()
        .success();
    assert!(out.join("third.bin").exists());
}

#[tokio::test]
async fn test_binary_config_output_dir_used_when_flag_absent() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cfg".to_vec()))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let out = tempdir.path().join("configured");
    write_omnifetch_config(
        &tempdir.path().join("xdg-config"),
        &format!(
            "output_dir = \"{}\"\nconcurrency = 2\n",
            out.to_string_lossy().replace('\\', "\\\\")
        ),
    );

    omnifetch(&tempdir)
        .arg("-q")
        .arg(format!("{}/cfg.txt", server.uri()))
        .assert()
        .success();
    assert_eq!(std::fs::read(out.join("cfg.txt")).unwrap(), b"cfg");
}
