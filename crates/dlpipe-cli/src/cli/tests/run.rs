//! Tests for the run subcommand.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use dlpipe_core::config::TaskFailurePolicy;

#[test]
fn cli_parse_run_defaults() {
    match parse(&["dlpipe", "run"]) {
        CliCommand::Run {
            config,
            concurrency,
            max_retries,
            verbose,
            on_task_failure,
            only,
        } => {
            assert!(config.is_none());
            assert!(concurrency.is_none());
            assert!(max_retries.is_none());
            assert!(!verbose);
            assert!(on_task_failure.is_none());
            assert!(only.is_empty());
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_overrides() {
    match parse(&[
        "dlpipe",
        "run",
        "--config",
        "/etc/dlpipe.toml",
        "--concurrency",
        "8",
        "--max-retries",
        "0",
        "-v",
        "--on-task-failure",
        "fail-run",
        "--only",
        "a",
        "--only",
        "b",
    ]) {
        CliCommand::Run {
            config,
            concurrency,
            max_retries,
            verbose,
            on_task_failure,
            only,
        } => {
            assert_eq!(config.as_deref(), Some(std::path::Path::new("/etc/dlpipe.toml")));
            assert_eq!(concurrency, Some(8));
            assert_eq!(max_retries, Some(0));
            assert!(verbose);
            assert_eq!(on_task_failure, Some(TaskFailurePolicy::FailRun));
            assert_eq!(only, vec!["a", "b"]);
        }
        _ => panic!("expected Run with overrides"),
    }
}

#[test]
fn cli_parse_run_rejects_unknown_policy() {
    assert!(Cli::try_parse_from(["dlpipe", "run", "--on-task-failure", "ignore"]).is_err());
}

#[test]
fn cli_parse_run_rejects_non_numeric_concurrency() {
    assert!(Cli::try_parse_from(["dlpipe", "run", "--concurrency", "many"]).is_err());
}

#[test]
fn verbose_flag_reaches_logging() {
    let cli = Cli::try_parse_from(["dlpipe", "run", "--verbose"]).unwrap();
    assert!(cli.verbose());
    let cli = Cli::try_parse_from(["dlpipe", "check"]).unwrap();
    assert!(!cli.verbose());
}
