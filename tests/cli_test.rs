//! CLI smoke tests.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn workflow_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write workflow");
    file
}

#[test]
fn validate_accepts_a_clean_workflow() {
    let file = workflow_file(
        r#"
name: ci
jobs:
  build:
    steps:
      - uses: shell@v1
        with:
          run: "true"
"#,
    );
    Command::cargo_bin("windlass")
        .unwrap()
        .arg("validate")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow 'ci' is valid"));
}

#[test]
fn validate_reports_field_errors_with_lines() {
    let file = workflow_file(
        r#"
name: ci
jobs:
  build:
    steps:
      - uses: ghost@v1
"#,
    );
    Command::cargo_bin("windlass")
        .unwrap()
        .arg("validate")
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("validation_error"))
        .stderr(predicate::str::contains("'ghost@v1' is not registered"))
        .stderr(predicate::str::contains("line 6"));
}

#[test]
fn run_executes_and_prints_job_conclusions() {
    let file = workflow_file(
        r#"
name: ci
jobs:
  build:
    steps:
      - uses: echo@v1
        with:
          message: "hello"
"#,
    );
    Command::cargo_bin("windlass")
        .unwrap()
        .arg("run")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("build: success"))
        .stdout(predicate::str::contains("workflow 'ci' succeeded"));
}

#[test]
fn run_fails_with_job_error() {
    let file = workflow_file(
        r#"
name: ci
jobs:
  build:
    steps:
      - uses: shell@v1
        with:
          run: "exit 1"
        retry-strategy:
          max-attempts: 1
"#,
    );
    Command::cargo_bin("windlass")
        .unwrap()
        .arg("run")
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("job 'build' failed"));
}

#[test]
fn nodes_lists_builtin_registry() {
    Command::cargo_bin("windlass")
        .unwrap()
        .arg("nodes")
        .assert()
        .success()
        .stdout(predicate::str::contains("shell@v1"))
        .stdout(predicate::str::contains("run (required)"));
}
