use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn vint_run_quickstart() {
    let mut cmd = Command::cargo_bin("vint").expect("binary exists");
    cmd.arg("run").arg("demos/quickstart.vint");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Hello from Vint!"))
        .stdout(predicate::str::contains("fib(10) = 55"))
        .stdout(predicate::str::contains("Hi, there"))
        .stdout(predicate::str::contains("from a task: 9"))
        .stdout(predicate::str::contains("area ~ 13"));
}

#[test]
fn vint_eval_snippet() {
    let mut cmd = Command::cargo_bin("vint").expect("binary exists");
    cmd.arg("eval").arg("println(1 + 2 + 3)");
    cmd.assert().success().stdout("6\n");
}

#[test]
fn runtime_errors_exit_with_failure() {
    let mut cmd = Command::cargo_bin("vint").expect("binary exists");
    cmd.arg("eval").arg("missing_name");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Identifier not found: missing_name"));
}

#[test]
fn path_option_extends_import_search() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("greetings.vint"), "let hello = \"hey\"\n").expect("write module");

    let mut cmd = Command::cargo_bin("vint").expect("binary exists");
    cmd.arg("--path")
        .arg(dir.path())
        .arg("eval")
        .arg("import greetings\nprintln(greetings.hello)");
    cmd.assert().success().stdout("hey\n");
}

#[test]
fn declaratives_write_tagged_lines() {
    let mut cmd = Command::cargo_bin("vint").expect("binary exists");
    cmd.arg("eval").arg("note \"remember\"");
    cmd.assert().success().stdout("[NOTE]: remember\n");
}
