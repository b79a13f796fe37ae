//! Command line tests, run against the loopback transport (`--local`).

use assert_cmd::Command;
use predicates::prelude::*;

fn devctl() -> Command {
    Command::cargo_bin("devctl").unwrap()
}

#[test]
fn test_help_runs() {
    devctl().arg("--help").assert().success();
}

#[test]
fn test_version_runs() {
    devctl().arg("--version").assert().success();
}

#[test]
fn test_subcommand_help_runs() {
    for subcommand in ["shell", "push", "wait-log", "record-log"] {
        devctl().args([subcommand, "--help"]).assert().success();
    }
}

#[test]
fn test_local_conflicts_with_serial() {
    devctl()
        .args(["--local", "--serial", "emulator-5554", "shell", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_ignore_filenames_requires_dry_run() {
    devctl()
        .args(["--local", "push", "--ignore-filenames", "a", "b"])
        .assert()
        .failure();
}

#[test]
fn test_shell_prints_output() {
    devctl()
        .args(["--local", "shell", "echo", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));
}

#[test]
fn test_shell_status_success() {
    devctl()
        .args(["--local", "--summary", "shell", "--status", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("exit status: 0"));
}

#[test]
fn test_shell_status_failure() {
    devctl()
        .args(["--local", "shell", "--status", "false"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exited with status 1"));
}

#[test]
fn test_strict_rejects_property_access() {
    devctl()
        .args(["--local", "--strict", "shell", "getprop", "ro.build.version.sdk"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("system property accessors"));
}

#[test]
fn test_push_missing_hasher() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let src = tmp_dir.path().join("src");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("file.txt"), "content").unwrap();
    devctl()
        .arg("--local")
        .arg("push")
        .arg("--hasher")
        .arg(tmp_dir.path().join("no-such-hasher"))
        .arg(&src)
        .arg(tmp_dir.path().join("dst"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("content hasher binary not found"));
}

#[test]
fn test_push_missing_source() {
    let tmp_dir = tempfile::tempdir().unwrap();
    devctl()
        .arg("--local")
        .arg("push")
        .arg(tmp_dir.path().join("missing"))
        .arg(tmp_dir.path().join("dst"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("local path not found"));
}

#[test]
fn test_wait_log_matches_after_the_marker() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let log = tmp_dir.path().join("device.log");
    std::fs::write(&log, "stale ready line\n").unwrap();
    let log = log.display().to_string();
    devctl()
        .args(["--local", "wait-log", "--timeout", "20s"])
        .args(["--log-command", &format!("tail -n +1 -f {log}")])
        .args([
            "--marker-command",
            &format!("echo {{marker}} >> {log} && echo fresh ready line >> {log}"),
        ])
        .arg("ready")
        .assert()
        .success()
        .stdout(predicate::str::contains("fresh ready line"))
        .stdout(predicate::str::contains("stale").not());
}

#[test]
fn test_wait_log_times_out() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let log = tmp_dir.path().join("device.log");
    std::fs::write(&log, "").unwrap();
    let log = log.display().to_string();
    devctl()
        .args(["--local", "wait-log", "--timeout", "1s"])
        .args(["--log-command", &format!("tail -n +1 -f {log}")])
        .args(["--marker-command", &format!("echo {{marker}} >> {log}")])
        .arg("never logged")
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout"));
}

#[test]
fn test_record_log_search_as_json() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let log = tmp_dir.path().join("device.log");
    std::fs::write(
        &log,
        "10-19 12:00:00.000  1234  1240 I chromium: page loaded\n\
         10-19 12:00:00.001  1234  1241 E chromium: renderer crashed\n",
    )
    .unwrap();
    let output = devctl()
        .args(["--local", "record-log", "--duration", "1s", "--level", "E", "--json"])
        .args(["--log-command", &format!("cat {}", log.display())])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let entries: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(entries.as_array().map(Vec::len), Some(1));
    assert_eq!(entries[0]["proc_id"], 1241);
    assert_eq!(entries[0]["message"], "renderer crashed");
}

#[test]
fn test_wait_log_mirrors_lines_read() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let log = tmp_dir.path().join("device.log");
    let mirror = tmp_dir.path().join("mirror.log");
    std::fs::write(&log, "stale ready line\n").unwrap();
    let log = log.display().to_string();
    devctl()
        .args(["--local", "wait-log", "--timeout", "20s"])
        .args(["--log-command", &format!("tail -n +1 -f {log}")])
        .args([
            "--marker-command",
            &format!("echo {{marker}} >> {log} && echo fresh ready line >> {log}"),
        ])
        .arg("--mirror")
        .arg(&mirror)
        .arg("ready")
        .assert()
        .success();
    let mirrored = std::fs::read_to_string(&mirror).unwrap();
    assert_eq!(mirrored, "fresh ready line\n");
}
