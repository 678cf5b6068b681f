//! CLI behavior of the sentinel_agent binary.
use assert_cmd::prelude::*;
use std::process::Command;
use std::time::Duration;

#[test]
fn help_prints_usage_and_exits_cleanly() {
    let out = Command::cargo_bin("sentinel_agent")
        .expect("binary exists")
        .arg("--help")
        .output()
        .expect("run agent");
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("Usage:"), "{text}");
    assert!(text.contains("--port"));
}

#[test]
fn unknown_flag_fails() {
    Command::cargo_bin("sentinel_agent")
        .expect("binary exists")
        .arg("--bogus")
        .assert()
        .failure();
}

#[test]
fn demo_mode_starts_on_ephemeral_port() {
    // Verify the flags are accepted by ensuring the process keeps running, then kill it.
    let mut child = Command::cargo_bin("sentinel_agent")
        .expect("binary exists")
        .args(["--demo", "-p", "0"])
        .spawn()
        .expect("spawn agent");
    std::thread::sleep(Duration::from_millis(300));
    let still_running = child.try_wait().expect("poll child").is_none();
    let _ = child.kill();
    let _ = child.wait();
    assert!(still_running, "agent exited early");
}
