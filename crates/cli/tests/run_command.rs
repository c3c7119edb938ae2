#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const SUBJECT: &str = "[ -e world.ark ] || exit 9; [ -e b.tribe ] && exit 7; exec sleep 30";

fn make_source(root: &Path) {
    let source = root.join("save_files");
    fs::create_dir_all(&source).unwrap();
    for id in ["a.tribe", "b.tribe", "c.tribe"] {
        fs::write(source.join(id), id).unwrap();
    }
    fs::write(source.join("world.ark"), "map").unwrap();
}

#[allow(deprecated)]
fn bisect(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bisect").expect("binary");
    cmd.current_dir(workdir).env_remove("BISECT_CONFIG");
    cmd
}

fn run_args(root: &Path) -> Vec<String> {
    let trial = root.join("World");
    vec![
        "run".into(),
        "--json".into(),
        "--source-root".into(),
        root.join("save_files").display().to_string(),
        "--suffix".into(),
        ".tribe".into(),
        "--trial-dir".into(),
        trial.display().to_string(),
        "--expected-dir-name".into(),
        "World".into(),
        "--state-dir".into(),
        root.join("state").display().to_string(),
        "--executable".into(),
        "sh".into(),
        "--arg".into(),
        "-c".into(),
        "--arg".into(),
        SUBJECT.into(),
        "--working-dir".into(),
        trial.display().to_string(),
        "--threshold-secs".into(),
        "0.5".into(),
        "--poll-interval-secs".into(),
        "0.1".into(),
    ]
}

fn run_json(root: &Path) -> Value {
    let output = bisect(root).args(run_args(root)).output().expect("run");
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn run_isolates_bad_candidate_and_persists_it() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    make_source(root);

    let summary = run_json(root);
    assert_eq!(summary["bad"], serde_json::json!(["b.tribe"]));
    assert_eq!(summary["good"], serde_json::json!(["a.tribe", "c.tribe"]));
    assert_eq!(summary["report"]["universe"], 3);

    assert_eq!(
        fs::read_to_string(root.join("state/bad.txt")).unwrap(),
        "b.tribe\n"
    );
    assert_eq!(
        fs::read_to_string(root.join("state/good.txt")).unwrap(),
        "a.tribe\nc.tribe\n"
    );

    // Same population again: nothing left to test.
    let again = run_json(root);
    assert_eq!(again["report"]["evaluations"], 0);
    assert_eq!(again["bad"], serde_json::json!(["b.tribe"]));
}

#[test]
fn status_reports_unclassified_candidates() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    make_source(root);
    fs::create_dir_all(root.join("state")).unwrap();
    fs::write(root.join("state/good.txt"), "a.tribe\n").unwrap();

    let output = bisect(root)
        .args(["status", "--json", "--source-root", "save_files"])
        .args(["--suffix", ".tribe", "--state-dir", "state"])
        .output()
        .expect("status");
    assert!(output.status.success());

    let status: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(status["good"], serde_json::json!(["a.tribe"]));
    assert_eq!(status["bad"], serde_json::json!([]));
    assert_eq!(
        status["unclassified"],
        serde_json::json!(["b.tribe", "c.tribe"])
    );
}

#[test]
fn candidates_reads_config_file() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    make_source(root);
    fs::write(
        root.join("bisect.toml"),
        "[candidates]\nsource_root = \"save_files\"\nsuffix = \".tribe\"\n",
    )
    .unwrap();

    bisect(root)
        .arg("candidates")
        .assert()
        .success()
        .stdout("a.tribe\nb.tribe\nc.tribe\n");
}

#[test]
fn run_refuses_unexpected_trial_dir_name() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    make_source(root);
    fs::create_dir_all(root.join("World")).unwrap();
    fs::write(root.join("World/keep.txt"), "precious").unwrap();

    let mut args = run_args(root);
    let pos = args.iter().position(|a| a == "World").unwrap();
    args[pos] = "TheIsland_WP".into();

    bisect(root)
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to use"));
    assert!(root.join("World/keep.txt").exists());
}

#[test]
fn run_refuses_state_dir_inside_trial_dir() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    make_source(root);
    fs::create_dir_all(root.join("World/state")).unwrap();
    fs::write(root.join("World/state/good.txt"), "a.tribe\n").unwrap();

    let mut args = run_args(root);
    let pos = args.iter().position(|a| a == "--state-dir").unwrap();
    args[pos + 1] = root.join("World/state").display().to_string();

    bisect(root)
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("classification store"));
    assert_eq!(
        fs::read_to_string(root.join("World/state/good.txt")).unwrap(),
        "a.tribe\n"
    );
}

#[test]
fn run_without_subject_is_an_error() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    make_source(root);

    bisect(root)
        .args(["run", "--source-root", "save_files", "--suffix", ".tribe"])
        .args(["--trial-dir", "World"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("subject.executable is not set"));
}
