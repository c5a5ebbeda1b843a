//! CLI arg parsing tests for the telemux client
use assert_cmd::Command;

#[test]
fn help_mentions_every_mode() {
    let out = Command::cargo_bin("telemux")
        .unwrap()
        .arg("--help")
        .output()
        .expect("run telemux --help");
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for flag in ["--metrics", "--logs", "-l", "--status", "--token", "Usage:"] {
        assert!(text.contains(flag), "help text missing {flag}\n{text}");
    }
}

#[test]
fn help_wins_over_other_flags() {
    Command::cargo_bin("telemux")
        .unwrap()
        .args(["--logs", "srv1", "--help"])
        .assert()
        .success();
}

#[test]
fn bad_arguments_exit_with_usage() {
    let out = Command::cargo_bin("telemux")
        .unwrap()
        .args(["--status", "--metrics"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage:"));
}

#[test]
fn unreachable_agent_is_an_error() {
    Command::cargo_bin("telemux")
        .unwrap()
        .args(["--status", "ws://127.0.0.1:1/ws"])
        .assert()
        .failure();
}
