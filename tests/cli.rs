use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

const DELAUNCH: &str = env!("CARGO_BIN_EXE_delaunch");

fn script(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
}

fn delaunch(args: &[&str]) -> Output {
    Command::new(DELAUNCH)
        .args(args)
        .env_remove("DELAUNCH_LOG")
        .output()
        .unwrap()
}

fn run_script(contents: &[u8]) -> Output {
    let file = script(contents);
    delaunch(&["-f", file.path().to_str().unwrap()])
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_no_arguments_is_a_usage_error() {
    let output = delaunch(&[]);

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(stderr(&output).contains("Please specify file"), "{}", stderr(&output));
}

#[test]
fn test_unknown_flag_is_a_usage_error() {
    let output = delaunch(&["--frobnicate"]);

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_missing_file_operand_is_a_usage_error() {
    assert_eq!(delaunch(&["-f"]).status.code(), Some(1));
    assert_eq!(delaunch(&["--file"]).status.code(), Some(1));
}

#[test]
fn test_help_goes_to_stdout() {
    let output = delaunch(&["--help"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("--file"), "{}", stdout(&output));
}

#[test]
fn test_unreadable_file() {
    let output = delaunch(&["--file", "/no/such/dir/tasks.txt"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("/no/such/dir/tasks.txt"));
}

#[test]
fn test_marker_reaches_stdout() {
    let output = run_script(b"0 /bin/echo delaunch-marker\n");

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "delaunch-marker");
}

#[test]
fn test_run_logs_parent_pid_and_task_banner() {
    let output = run_script(b"0 /bin/echo hi\n");
    let log = stderr(&output);

    assert!(log.contains("supervisor started"), "{}", log);
    assert!(log.contains("env_vars="), "{}", log);
    assert!(log.contains("starting task"), "{}", log);
    assert!(log.contains("/bin/echo"), "{}", log);
}

#[test]
fn test_invalid_delay_launches_nothing() {
    let output = run_script(b"0 /bin/echo first\nabc /bin/echo hi\n");

    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty(), "{}", stdout(&output));
    assert!(stderr(&output).contains("invalid delay"), "{}", stderr(&output));
}

#[test]
fn test_too_many_tasks_launches_nothing() {
    let output = run_script("0 /bin/echo launched\n".repeat(257).as_bytes());

    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
    assert!(stderr(&output).contains("more than 256 tasks"), "{}", stderr(&output));
}

#[test]
fn test_limits_are_configurable() {
    let file = script(b"0 /bin/echo a\n0 /bin/echo b\n0 /bin/echo c\n");
    let path = file.path().to_str().unwrap();

    let output = delaunch(&["-f", path, "--max-tasks", "2"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());

    let output = delaunch(&["-f", path, "--max-args", "1"]);
    assert_eq!(output.status.code(), Some(3));

    let output = delaunch(&["-f", path, "--max-tasks", "3"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_missing_program_does_not_stop_other_tasks() {
    let output = run_script(b"0 /no/such/binary\n0 /bin/echo still-launched\n");

    assert_eq!(output.status.code(), Some(4));
    assert!(stdout(&output).contains("still-launched"));

    let log = stderr(&output);
    assert!(log.contains("failed to launch"), "{}", log);
    assert!(log.contains("/no/such/binary"), "{}", log);
}

#[test]
fn test_program_without_execute_permission_fails_to_launch() {
    let not_executable = script(b"#!/bin/sh\necho never\n");
    fs::set_permissions(not_executable.path(), Permissions::from_mode(0o644)).unwrap();
    let contents = format!("0 {}\n0 /bin/echo ok\n", not_executable.path().display());

    let output = run_script(contents.as_bytes());

    assert_eq!(output.status.code(), Some(4), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "ok");
    assert!(stderr(&output).contains("EACCES"), "{}", stderr(&output));
}

#[test]
fn test_killed_task_does_not_fail_the_run() {
    let output = run_script(b"0 /bin/sh -c kill${IFS}-9${IFS}$$\n0 /bin/echo survivor\n");

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "survivor");

    let log = stderr(&output);
    assert!(log.contains("killed by SIGKILL"), "{}", log);
    assert!(log.contains("exited with status 0"), "{}", log);
}

#[test]
fn test_program_exiting_127_is_not_a_launch_failure() {
    let exit_127 = script(b"exit 127\n");
    let contents = format!("0 /bin/sh {}\n", exit_127.path().display());

    let output = run_script(contents.as_bytes());

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(stderr(&output).contains("exited with status 127"));
    assert!(!stderr(&output).contains("failed to launch"));
}

#[test]
fn test_failing_task_does_not_fail_the_run() {
    let output = run_script(b"0 /bin/sh -c false\n");

    assert_eq!(output.status.code(), Some(0));
    assert!(stderr(&output).contains("exited with status 1"));
}

#[test]
fn test_trailing_content_is_only_a_warning() {
    let output = run_script(b"0 /bin/echo ok\n\0garbage after the end");

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output).trim(), "ok");
    assert!(stderr(&output).contains("trailing content"), "{}", stderr(&output));
}

#[test]
fn test_environment_is_inherited() {
    let file = script(b"0 /usr/bin/env\n");

    let output = Command::new(DELAUNCH)
        .args(&["-f", file.path().to_str().unwrap()])
        .env("DELAUNCH_TEST_MARKER", "inherited-value")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output)
        .lines()
        .any(|line| line == "DELAUNCH_TEST_MARKER=inherited-value"));
}

#[test]
fn test_short_delay_does_not_wait_for_long_delay() {
    let output = run_script(b"2 /bin/echo slow\n0 /bin/echo fast\n");

    assert_eq!(output.status.code(), Some(0));
    let lines = stdout(&output).lines().map(str::to_string).collect::<Vec<_>>();
    assert_eq!(lines, vec!["fast", "slow"]);
}

#[test]
fn test_delays_run_concurrently() {
    let started = Instant::now();
    let output = run_script(b"1 /bin/sleep 1\n1 /bin/sleep 1\n1 /bin/sleep 1\n");
    let elapsed = started.elapsed();

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
}

#[test]
fn test_every_task_is_reaped() {
    let tasks = "0 /bin/echo task\n".repeat(20);
    let output = run_script(tasks.as_bytes());

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output).lines().filter(|l| *l == "task").count(), 20);
    assert_eq!(
        stderr(&output).matches("exited with status 0").count(),
        20,
        "{}",
        stderr(&output)
    );
}

#[test]
fn test_fork_failure_reaps_started_workers() {
    // few enough descriptors that the report pipe of some later task cannot be created
    let file = script("0 /bin/echo started\n".repeat(64).as_bytes());
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg("ulimit -n 16 && exec \"$0\" -f \"$1\"")
        .arg(DELAUNCH)
        .arg(file.path())
        .env_remove("DELAUNCH_LOG")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(5), "{}", stderr(&output));

    let log = stderr(&output);
    assert!(log.contains("failed to start worker for task"), "{}", log);
    assert!(log.contains("all tasks finished"), "{}", log);

    let started = stdout(&output).lines().filter(|l| *l == "started").count();
    assert!(started > 0 && started < 64, "{}", started);
    assert_eq!(log.matches("exited with status 0").count(), started, "{}", log);
}

#[test]
fn test_dry_run_launches_nothing() {
    let file = script(b"0 /bin/echo not-launched\n5 /bin/sleep 10\n");

    let output = delaunch(&["--dry-run", "-f", file.path().to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    let listing = stdout(&output);
    assert_eq!(listing.lines().count(), 2, "{}", listing);
    assert!(listing.contains("+0s /bin/echo not-launched"));
    assert!(listing.contains("+5s /bin/sleep 10"));
    assert!(!listing.lines().any(|line| line == "not-launched"));
}

#[test]
fn test_empty_script() {
    let output = run_script(b"\n  \n");

    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
}
