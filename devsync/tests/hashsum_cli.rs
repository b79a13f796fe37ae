use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn check_hashsum_help() {
    Command::cargo_bin("hashsum")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn paths_are_required() {
    Command::cargo_bin("hashsum").unwrap().assert().failure();
}

#[test]
fn prints_one_line_per_file() {
    let tmp_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp_dir.path().join("d")).unwrap();
    std::fs::write(tmp_dir.path().join("d").join("hello"), "hello world").unwrap();
    std::fs::write(tmp_dir.path().join("d").join("empty"), "").unwrap();
    let output = Command::cargo_bin("hashsum")
        .unwrap()
        .arg(tmp_dir.path().join("d"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    let parsed = devsync::hashsum::parse_output(&stdout.lines().collect::<Vec<_>>());
    assert_eq!(parsed.len(), 2);
    assert!(parsed.iter().any(|h| h.path.ends_with("/d/hello")
        && h.hash == "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"));
    assert!(parsed.iter().all(|h| h.path.starts_with('/')));
}

#[test]
fn missing_path_fails_but_reports_the_rest() {
    let tmp_dir = tempfile::tempdir().unwrap();
    std::fs::write(tmp_dir.path().join("hello"), "hello world").unwrap();
    Command::cargo_bin("hashsum")
        .unwrap()
        .arg(tmp_dir.path().join("missing"))
        .arg(tmp_dir.path().join("hello"))
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9  /",
        ))
        .stderr(predicate::str::contains("hashsum:"));
}

#[test]
fn unreadable_file_fails_but_reports_the_rest() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let dir = tmp_dir.path().join("d");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("hello"), "hello world").unwrap();
    // a regular file whose reads fail, even for root
    let private = dir.join("private.db");
    std::os::unix::fs::symlink("/proc/self/mem", &private).unwrap();
    if std::fs::read(&private).is_ok() {
        return;
    }
    Command::cargo_bin("hashsum")
        .unwrap()
        .arg(&dir)
        .assert()
        .failure()
        .stdout(predicate::str::contains("/d/hello"))
        .stdout(predicate::str::contains("private.db").not())
        .stderr(predicate::str::contains("private.db"));
}
