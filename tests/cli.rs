//! CLI contract tests: the `send` entry-point and its reply markers.

mod common;

use common::{moobot_bin, stub_state_dir};

#[test]
fn version_prints_and_exits_zero() {
    moobot_bin()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("moobot"));
}

#[test]
fn send_wraps_reply_in_markers() {
    let state = stub_state_dir();
    let assert = moobot_bin()
        .env("MOOBOT_STATE_DIR", state.path())
        .args(["send", "hello from the harness"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let start = stdout.find("E2E_REPLY_START").expect("start marker");
    let end = stdout.find("E2E_REPLY_END").expect("end marker");
    assert!(start < end);
    let reply = &stdout[start + "E2E_REPLY_START".len()..end];
    assert!(reply.contains("hello from the harness"));
}

#[test]
fn send_logs_the_exchange_in_the_state_dir() {
    let state = stub_state_dir();
    moobot_bin()
        .env("MOOBOT_STATE_DIR", state.path())
        .args(["send", "first message"])
        .assert()
        .success();

    let private_dir = state.path().join("workspace").join("chat-log").join("private");
    let entries: Vec<_> = std::fs::read_dir(&private_dir)
        .expect("private chat-log dir")
        .flatten()
        .collect();
    assert_eq!(entries.len(), 1);
    let content = std::fs::read_to_string(entries[0].path()).unwrap();
    assert!(content.contains("first message"));
}

#[test]
fn send_without_config_fails_nonzero() {
    let empty = tempfile::TempDir::new().unwrap();
    moobot_bin()
        .env("MOOBOT_STATE_DIR", empty.path())
        .args(["send", "hi"])
        .assert()
        .failure();
}

#[test]
fn daemon_mode_without_transport_fails_nonzero() {
    let state = stub_state_dir();
    moobot_bin()
        .env("MOOBOT_STATE_DIR", state.path())
        .assert()
        .failure();
}

#[test]
fn unknown_command_fails() {
    moobot_bin().arg("frobnicate").assert().failure();
}
