//! `dlpipe run` – run the pipeline once.

use anyhow::Result;
use dlpipe_core::config::{PipelineConfig, RetryConfig, TaskFailurePolicy};
use dlpipe_core::site::{ManifestSettings, ManifestSite};
use dlpipe_core::PipelineOrchestrator;
use std::process::ExitCode;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunOverrides {
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub verbose: bool,
    pub on_task_failure: Option<TaskFailurePolicy>,
    pub only: Vec<String>,
}

impl RunOverrides {
    pub fn apply(&self, cfg: &mut PipelineConfig) {
        if let Some(n) = self.concurrency {
            cfg.concurrency = n;
        }
        if let Some(n) = self.max_retries {
            let mut retry = cfg.retry.clone().unwrap_or_else(RetryConfig::default);
            retry.max_retries = n;
            cfg.retry = Some(retry);
        }
        if self.verbose {
            cfg.verbose = true;
        }
        if let Some(policy) = self.on_task_failure {
            cfg.on_task_failure = policy;
        }
    }
}

pub async fn run_pipeline(mut cfg: PipelineConfig, overrides: RunOverrides) -> Result<ExitCode> {
    overrides.apply(&mut cfg);
    cfg.validate()?;

    let mut settings = ManifestSettings::from_table(&cfg.site)?;
    settings.only.extend(overrides.only);
    let site = ManifestSite::new(settings)?;

    let orchestrator = PipelineOrchestrator::new(site, &cfg)?;
    let cancel = orchestrator.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling run");
            eprintln!("interrupted; stopping downloads");
            cancel.cancel();
        }
    });

    let outcome = orchestrator.run().await;
    interrupt.abort();
    let summary = outcome?;

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{} of {} task(s) failed (on_task_failure = {})",
            summary.failed(),
            summary.total,
            summary.on_task_failure
        );
        Ok(ExitCode::FAILURE)
    }
}
