//! Integration tests for the CLI interface
//!
//! Tests the demo commands end to end, worker processes included.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn procpool() -> Command {
    let mut cmd = Command::cargo_bin("procpool").unwrap();
    cmd.env_remove("RUST_LOG");
    for var in [
        "PROCESSES",
        "MAX_TASKS_PER_WORKER",
        "HANDOFF_TIMEOUT",
        "SHUTDOWN_GRACE",
        "WORKER_PROGRAM",
    ] {
        cmd.env_remove(format!("PROCPOOL_{}", var));
    }
    cmd
}

#[test]
fn test_cli_help_flag() {
    procpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("factorial"))
        .stdout(predicate::str::contains("sleeper"));
}

#[test]
fn test_factorial_prints_in_order() {
    procpool()
        .args(["factorial", "-p", "2", "1", "2", "3", "4", "5"])
        .assert()
        .success()
        .stdout("1! = 1\n2! = 2\n3! = 6\n4! = 24\n5! = 120\n");
}

#[test]
fn test_sleeper_keeps_input_order() {
    procpool()
        .args(["sleeper", "-p", "3", "--unit-ms", "30", "3", "1", "2"])
        .assert()
        .success()
        .stdout("3\n1\n2\n");
}

#[test]
fn test_max_tasks_replaces_workers_transparently() {
    procpool()
        .args(["factorial", "-p", "2", "--max-tasks", "1", "6", "5", "4", "3"])
        .assert()
        .success()
        .stdout("6! = 720\n5! = 120\n4! = 24\n3! = 6\n");
}

#[test]
fn test_overflow_reported_and_others_printed() {
    procpool()
        .args(["factorial", "-p", "2", "3", "21", "4"])
        .assert()
        .code(4)
        .stdout("3! = 6\n4! = 24\n")
        .stderr(predicate::str::contains("21! does not fit in 64 bits"));
}

#[test]
fn test_zero_processes_rejected() {
    procpool()
        .args(["factorial", "-p", "0", "1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("processes must be at least 1"));
}

#[test]
fn test_config_file_is_used() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pool.toml");
    std::fs::write(&path, "processes = 2\nhandoff_timeout = \"3s\"\n").unwrap();

    procpool()
        .arg("--config")
        .arg(&path)
        .args(["factorial", "10"])
        .assert()
        .success()
        .stdout("10! = 3628800\n");
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pool.toml");
    std::fs::write(&path, "processes = \"several\"\n").unwrap();

    procpool()
        .arg("--config")
        .arg(&path)
        .args(["factorial", "1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load"));
}

#[test]
fn test_env_override_applies() {
    procpool()
        .env("PROCPOOL_PROCESSES", "0")
        .args(["sleeper", "1"])
        .assert()
        .code(2);
}

#[test]
fn test_worker_program_that_never_starts() {
    procpool()
        .env("PROCPOOL_WORKER_PROGRAM", "false")
        .args(["factorial", "-p", "2", "3", "4"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(3)
        .stdout("")
        .stderr(predicate::str::contains("exited before reporting ready"));
}

#[test]
fn test_invalid_command() {
    procpool()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}
