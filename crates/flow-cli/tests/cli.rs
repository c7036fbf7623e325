//! Black-box tests against the built `flow` binary. `flow-cli` has no
//! library target, so these drive it the only way an external test can:
//! as a subprocess against a scratch database file.

use std::process::{Command, Output};

use tempfile::tempdir;

fn flow(db_path: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_flow"))
        .arg("--db-path")
        .arg(db_path)
        .args(args)
        .output()
        .expect("failed to spawn flow binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

// --- Happy path ---

#[test]
fn mkdir_then_set_then_cat_round_trips_through_the_cli() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("flow.db");

    let created = flow(&db_path, &["mkdir", "demo", "--kind", "project"]);
    assert!(created.status.success(), "{}", stderr(&created));
    assert!(stdout(&created).contains("Created container"));

    let listed = flow(&db_path, &["ls"]);
    assert!(listed.status.success());
    assert!(stdout(&listed).contains("demo"));

    let projects = flow(&db_path, &["projects"]);
    assert!(projects.status.success());
    assert!(stdout(&projects).contains("demo"));
}

#[test]
fn doctor_reports_no_issues_on_a_freshly_created_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("flow.db");

    let mkdir = flow(&db_path, &["mkdir", "demo"]);
    assert!(mkdir.status.success());

    let doctor = flow(&db_path, &["doctor"]);
    assert!(doctor.status.success(), "{}", stderr(&doctor));
    assert!(stdout(&doctor).contains("No issues found"));
}

// --- Error exit codes ---

#[test]
fn cat_on_an_unknown_selector_fails_with_a_nonzero_exit_code() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("flow.db");

    let mkdir = flow(&db_path, &["mkdir", "demo"]);
    assert!(mkdir.status.success());

    let cat = flow(&db_path, &["cat", "T-99999"]);
    assert!(!cat.status.success());
    assert!(stderr(&cat).contains("error:"));
}

#[test]
fn set_with_a_stale_if_match_fails_without_writing() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("flow.db");

    assert!(flow(&db_path, &["mkdir", "demo"]).status.success());
    assert!(flow(&db_path, &["set", "demo", "--set", "title=Demo"]).status.success());

    let stale = flow(&db_path, &["set", "demo", "--set", "title=Stale", "--if-match", "999"]);
    assert!(!stale.status.success());

    let cat = flow(&db_path, &["cat", "demo"]);
    assert!(stdout(&cat).contains("Demo"));
}
