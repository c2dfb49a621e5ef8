//! End-to-end tests of the `dtest` binary against real local processes.
//!
//! Run with: `cargo test --test cli_tests`

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn dtest(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dtest"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("DTEST_CONFIG")
        .env("DTEST_LOGGING__LEVEL", "error")
        .output()
        .unwrap()
}

fn write_script(dir: &TempDir, name: &str, source: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(source.as_bytes()).unwrap();
    path.display().to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_and_version_exit_zero() {
    let dir = TempDir::new().unwrap();
    for flag in ["-h", "--help"] {
        let output = dtest(dir.path(), &[flag]);
        assert_eq!(output.status.code(), Some(0));
        assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
    }

    let output = dtest(dir.path(), &["--version"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_argument_count_mismatch_exits_one() {
    let dir = TempDir::new().unwrap();

    let output = dtest(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Usage"));

    let output = dtest(dir.path(), &["a.rhai", "b.rhai"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_hostname_suite_passes() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        "hostname.rhai",
        r#"
        dtest::cluster(2, "x");
        dtest::add_process([0, 1], ["/bin/sh", "-c", "echo $DTEST_NODE_NAME"]);
        dtest::add_test("every node reports its name", |lines| {
            dtest::expect_event_sequence(lines, ["^x1: x1$"]);
            dtest::expect_event_sequence(lines, ["^x2: x2$"]);
        });
        dtest::run();
        "#,
    );

    let output = dtest(dir.path(), &[&script]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
}

#[test]
fn test_fail_exits_one_with_message() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        "disk.rhai",
        r#"
        dtest::cluster(1, "x");
        dtest::add_process([0], ["/bin/sh", "-c", "echo up"]);
        dtest::add_test("disk", |lines| { dtest::fail("disk full"); });
        dtest::run();
        "#,
    );

    let output = dtest(dir.path(), &[&script]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("disk full"));
}

#[test]
fn test_nonzero_policy_result_exits_one() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        "exit.rhai",
        r#"
        dtest::cluster(2, "x");
        dtest::exit_code("2");
        dtest::add_process([0, 1], ["/bin/sh", "-c", "exit $DTEST_NODE_INDEX"]);
        let code = dtest::run();
        print("suite exit code " + code);
        "#,
    );

    let output = dtest(dir.path(), &[&script]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("suite exit code 1"));
}

#[test]
fn test_callback_sees_output_of_launched_process() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        "pong.rhai",
        r#"
        dtest::cluster(1, "x");
        dtest::add_process([0], ["/bin/sh", "-c", "echo start"]);
        let answered = false;
        dtest::add_test("pong arrives", |lines| {
            if "x1: pong" in lines {
                answered = true;
            } else {
                dtest::run_process([0], ["/bin/echo", "pong"]);
            }
        });
        dtest::run();
        if !answered { dtest::fail("pong never arrived"); }
        "#,
    );

    let output = dtest(dir.path(), &[&script]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
}

#[test]
fn test_phase_violation_exits_one() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        &dir,
        "early.rhai",
        r#"
        dtest::cluster(1, "x");
        dtest::kill_node([0]);
        "#,
    );

    let output = dtest(dir.path(), &[&script]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("post-run"));
}

#[test]
fn test_missing_script_exits_one() {
    let dir = TempDir::new().unwrap();
    let output = dtest(dir.path(), &["missing.rhai"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("cannot read script"));
}

#[test]
fn test_invalid_configuration_exits_one() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "empty.rhai", "");
    std::fs::write(dir.path().join("dtest.toml"), "[logging]\nformat = \"xml\"\n").unwrap();

    let output = dtest(dir.path(), &[&script]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("logging.format"));
}
