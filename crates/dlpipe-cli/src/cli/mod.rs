//! CLI for the dlpipe download orchestrator.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dlpipe_core::config::{self, PipelineConfig, TaskFailurePolicy};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use commands::{run_check, run_config_path, run_pipeline, RunOverrides};

/// Top-level CLI for dlpipe.
#[derive(Debug, Parser)]
#[command(name = "dlpipe")]
#[command(about = "dlpipe: log in, discover tasks, download them with retries", long_about = None)]
pub struct Cli {
    /// Log to stderr instead of ~/.local/state/dlpipe/dlpipe.log.
    #[arg(long, global = true)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Authenticate, discover tasks, download them and print a report.
    Run {
        /// Config file (default: ~/.config/dlpipe/config.toml, created if missing).
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Maximum downloads in flight at once.
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
        /// Retries per phase and per task after the first attempt.
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
        /// Log every failed attempt, not just exhausted ones.
        #[arg(long, short)]
        verbose: bool,
        /// What a task that exhausts its retries does: continue, fail-run or abort.
        #[arg(long, value_name = "POLICY")]
        on_task_failure: Option<TaskFailurePolicy>,
        /// Only download tasks with this name (repeatable).
        #[arg(long, value_name = "NAME")]
        only: Vec<String>,
    },

    /// Validate the config and show what a run would do.
    Check {
        /// Config file (default: ~/.config/dlpipe/config.toml).
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the default config file path.
    ConfigPath,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        matches!(self.command, CliCommand::Run { verbose: true, .. })
    }

    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            CliCommand::Run {
                config,
                concurrency,
                max_retries,
                verbose,
                on_task_failure,
                only,
            } => {
                let cfg = load_config(config.as_deref())?;
                let overrides = RunOverrides {
                    concurrency,
                    max_retries,
                    verbose,
                    on_task_failure,
                    only,
                };
                run_pipeline(cfg, overrides).await
            }
            CliCommand::Check { config } => {
                let cfg = load_config(config.as_deref())?;
                run_check(&cfg)?;
                Ok(ExitCode::SUCCESS)
            }
            CliCommand::ConfigPath => {
                run_config_path()?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let cfg = match path {
        Some(p) => config::load_from_path(p)?,
        None => config::load_or_init()?,
    };
    tracing::debug!("loaded config: {:?}", cfg);
    Ok(cfg)
}

#[cfg(test)]
mod tests;
