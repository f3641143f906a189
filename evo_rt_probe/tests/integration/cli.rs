//! Integration test: command-line entry point.

use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_evo_rt_probe"));
    cmd.env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Wait for `child` to exit, killing it after `timeout`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = child.kill();
    let _ = child.wait();
    None
}

#[test]
fn json_report_is_alone_on_stdout() {
    let output = binary()
        .args(["0.001", "--simulate", "--cycles", "5", "--report", "json"])
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["cycles"].as_u64().unwrap() >= 5);
    assert_eq!(report["state_history"].as_array().unwrap().len(), 5);
    assert!(String::from_utf8_lossy(&output.stderr).contains("Run report"));
}

#[test]
fn startup_failure_goes_to_stderr() {
    let output = binary()
        .args(["0.001", "--simulate", "--config", "/nonexistent/probe.toml"])
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("FATAL"));
}

#[test]
fn invalid_period_exits_with_usage() {
    let output = binary()
        .args(["-1"])
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn closed_stdin_stops_the_run() {
    let mut child = binary()
        .args(["0.01", "--simulate"])
        .stdin(Stdio::null())
        .spawn()
        .unwrap();

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.is_some_and(|s| s.success()), "{status:?}");
}

#[test]
fn enter_stops_the_run() {
    let mut child = binary()
        .args(["0.01", "--simulate", "--report", "json"])
        .stdin(Stdio::piped())
        .spawn()
        .unwrap();

    thread::sleep(Duration::from_millis(100));
    {
        use std::io::Write;
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(b"\n").unwrap();
    }

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.is_some_and(|s| s.success()), "{status:?}");
}
