// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the `hostbatch` binary, using `/bin/sh` as a generic host.

#![cfg(unix)]

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use hostbatch_metadata::{HostbatchExitCode, Isolation, PlanSummary};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::process::{Command, Output};

fn write(dir: &Utf8Path, name: &str, contents: &str) {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A workspace with a TOML suite of two cases and a JSON suite of one.
fn workspace() -> Utf8TempDir {
    let dir = Utf8TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        ".config/hostbatch.toml",
        indoc! {r#"
            [run]
            workers = 2
            retries = 0
            poll-interval = "20ms"
            grace-period = "1s"

            [hosts.generic]
            program = "/bin/sh"
            args = ["-c", 'for s in "$@"; do . "$s"; done', "fake-host"]
        "#},
    );
    write(
        root,
        "suites/smoke.hostbatch.toml",
        indoc! {r#"
            [suite]
            name = "smoke"

            [defaults]
            host_kind = "Generic"
            timeout_s = 10
            expected_lines = ["DONE"]

            [[case]]
            id = "hello"
            script_path = "hello.sh"
            case_ids = [11]

            [[case]]
            id = "broken"
            script_path = "broken.sh"
            forbidden_lines = ["Traceback"]
            case_ids = [12]
        "#},
    );
    write(
        root,
        "suites/extra/solo.hostbatch.json",
        indoc! {r#"
            [{"id": "solo", "script_path": "solo.sh", "host_kind": "Generic",
              "isolation": "Isolated", "expected_lines": ["DONE"], "timeout_s": 10}]
        "#},
    );
    write(
        root,
        "suites/hello.sh",
        "echo 'hello DONE' >> \"$HOSTBATCH_LOG_PATH\"\n",
    );
    write(
        root,
        "suites/broken.sh",
        "echo 'Traceback (most recent call last)' >> \"$HOSTBATCH_LOG_PATH\"\necho 'broken DONE' >> \"$HOSTBATCH_LOG_PATH\"\n",
    );
    write(
        root,
        "suites/extra/solo.sh",
        "echo 'solo DONE' >> \"$HOSTBATCH_LOG_PATH\"\n",
    );
    dir
}

fn hostbatch(dir: &Utf8Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hostbatch"))
        .args(args)
        .arg("--color=never")
        .current_dir(dir)
        .env_remove("HOSTBATCH_LOG")
        .output()
        .unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn list_json() {
    let dir = workspace();
    let output = hostbatch(dir.path(), &["list", "--message-format", "json", "suites"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let summary: PlanSummary = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary.case_count, 3);
    let mut batches: Vec<_> = summary
        .batches
        .iter()
        .map(|batch| (batch.isolation, batch.cases.clone()))
        .collect();
    batches.sort();
    assert_eq!(
        batches,
        [
            (
                Isolation::Batched,
                vec!["hello".to_owned(), "broken".to_owned()]
            ),
            (Isolation::Isolated, vec!["solo".to_owned()]),
        ]
    );
}

#[test]
fn list_no_test_batch() {
    let dir = workspace();
    let output = hostbatch(
        dir.path(),
        &["list", "--message-format", "json", "--no-test-batch"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let summary: PlanSummary = serde_json::from_slice(&output.stdout).unwrap();
    assert!(
        summary
            .batches
            .iter()
            .all(|batch| batch.isolation != Isolation::Batched),
        "{summary:?}"
    );
}

#[test]
fn run_reports_failures() {
    let dir = workspace();
    let output = hostbatch(dir.path(), &["run", "suites", "--junit", "junit.xml"]);
    let stderr = stderr(&output);
    assert_eq!(
        output.status.code(),
        Some(HostbatchExitCode::TESTS_FAILED),
        "{stderr}"
    );
    assert!(stderr.contains("Starting 3 cases in 2 batches"), "{stderr}");
    assert!(
        stderr.contains("3 cases run: 2 passed, 1 failed"),
        "{stderr}"
    );
    assert!(stderr.contains("FAIL broken: forbidden line"), "{stderr}");

    let store = dir.path().join("target/hostbatch");
    let junit = std::fs::read_to_string(store.join("junit.xml")).unwrap();
    assert!(junit.contains(r#"<testsuite name="smoke""#), "{junit}");
    assert!(junit.contains(r#"<testsuite name="solo""#), "{junit}");
    assert!(
        junit.contains(r#"<property name="test_case_id" value="12"/>"#),
        "{junit}"
    );
    let hints = std::fs::read_to_string(store.join("rerun-hints.txt")).unwrap();
    assert!(hints.starts_with("FAIL broken: forbidden line\n"), "{hints}");
}

#[test]
fn run_selected_cases() {
    let dir = workspace();
    let output = hostbatch(
        dir.path(),
        &["run", "--test-case-ids", "11,12", "--case", "hello"],
    );
    let stderr = stderr(&output);
    assert_eq!(output.status.code(), Some(HostbatchExitCode::OK), "{stderr}");
    assert!(stderr.contains("1 case run: 1 passed"), "{stderr}");
    assert!(!stderr.contains("solo"), "{stderr}");
}

#[test]
fn nothing_selected() {
    let dir = workspace();
    let output = hostbatch(dir.path(), &["run", "--case", "missing"]);
    assert_eq!(
        output.status.code(),
        Some(HostbatchExitCode::NO_TESTS_COLLECTED)
    );
    assert!(
        stderr(&output).contains("error: none of the 3 loaded cases matched the selection"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn invalid_config() {
    let dir = workspace();
    write(dir.path(), ".config/hostbatch.toml", "[run]\nbatch-size = 0\n");
    let output = hostbatch(dir.path(), &["list"]);
    assert_eq!(output.status.code(), Some(HostbatchExitCode::USAGE_ERROR));
    assert!(
        stderr(&output).contains("error: failed to parse hostbatch config"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn duplicate_case_ids() {
    let dir = workspace();
    write(
        dir.path(),
        "suites/dup.hostbatch.json",
        r#"[{"id": "hello", "script_path": "hello.sh", "host_kind": "Generic"}]"#,
    );
    let output = hostbatch(dir.path(), &["list"]);
    assert_eq!(output.status.code(), Some(HostbatchExitCode::USAGE_ERROR));
    assert!(stderr(&output).contains("Caused by:"), "{}", stderr(&output));
}
