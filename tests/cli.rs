use predicates::prelude::*;

use bookfetch::formats::FailureRecord;

#[test]
fn help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("chapters"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn status_of_empty_save_dir_reports_nothing() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.args(["status", "--out"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout("Completed chapters: 0\nNo unresolved chapters.\n");
}

#[test]
fn status_prints_failure_report() {
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("download_status.json"),
        r#"["1001","1002"]"#,
    )
    .unwrap();
    let failures = vec![FailureRecord {
        index: 3,
        id: "1003".to_owned(),
        title: "第三章".to_owned(),
        url: "https://books.example.com/txt/7/1003".to_owned(),
    }];
    std::fs::write(
        temp.path().join("failed_chapters.json"),
        serde_json::to_vec(&failures).unwrap(),
    )
    .unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.args(["status", "--out"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed chapters: 2"))
        .stdout(predicate::str::contains("Unresolved chapters: 1"))
        .stdout(predicate::str::contains(
            "#3 第三章 [1003] https://books.example.com/txt/7/1003",
        ));
}

#[test]
fn status_of_missing_dir_fails() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.args(["status", "--out"])
        .arg(temp.path().join("nope"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("save directory does not exist"));
}

#[test]
fn download_rejects_zero_workers() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.args(["download", "--book", "7", "--workers", "0", "--out"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--workers must be at least 1"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookfetch");
    cmd.env("RUST_LOG", "debug")
        .args(["status", "--out"])
        .arg(temp.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
