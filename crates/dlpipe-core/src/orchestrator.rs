//! Pipeline orchestrator: authenticate → discover → download → report.
//!
//! Phases run strictly one after another; only the download phase runs work
//! concurrently. The capability's `close` is awaited on every exit path.

use futures::{FutureExt, TryStreamExt};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capability::{Downloader, TaskLabel};
use crate::config::{PipelineConfig, TaskFailurePolicy};
use crate::error::PipelineError;
use crate::executor::BoundedExecutor;
use crate::result::PipelineResult;
use crate::retry::{BackoffPolicy, RetryableOperation};

/// States of a pipeline run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Authenticating,
    Discovering,
    Downloading,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Authenticating => "authenticating",
            Phase::Discovering => "discovering",
            Phase::Downloading => "downloading",
            Phase::Reporting => "reporting",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a run that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Labels of tasks that ended in failure, sorted.
    pub failed_tasks: Vec<String>,
    pub on_task_failure: TaskFailurePolicy,
}

impl RunSummary {
    fn from_results<T: TaskLabel, O>(
        results: &PipelineResult<T, O>,
        on_task_failure: TaskFailurePolicy,
    ) -> Self {
        Self {
            total: results.len(),
            succeeded: results.success_count(),
            failed_tasks: results.failed_labels(),
            on_task_failure,
        }
    }

    pub fn failed(&self) -> usize {
        self.failed_tasks.len()
    }

    /// Whether the process should exit successfully.
    pub fn is_success(&self) -> bool {
        self.failed_tasks.is_empty() || self.on_task_failure == TaskFailurePolicy::Continue
    }
}

pub struct PipelineOrchestrator<D: Downloader> {
    downloader: Arc<D>,
    limit: NonZeroUsize,
    policy: BackoffPolicy,
    verbose: bool,
    on_task_failure: TaskFailurePolicy,
    cancel: CancellationToken,
    phase: Phase,
}

impl<D: Downloader> PipelineOrchestrator<D> {
    /// Takes ownership of the downloader (and its session). Rejects a bad
    /// config here, before any phase runs.
    pub fn new(downloader: D, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let limit = config.concurrency_limit()?;
        let policy = config.backoff_policy()?;
        Ok(Self {
            downloader: Arc::new(downloader),
            limit,
            policy,
            verbose: config.verbose,
            on_task_failure: config.on_task_failure,
            cancel: CancellationToken::new(),
            phase: Phase::Init,
        })
    }

    /// Token that cancels the run; in-flight work is abandoned, not drained.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs every phase to `Done` or `Failed`, then releases the session.
    pub async fn run(mut self) -> Result<RunSummary, PipelineError> {
        let caught = AssertUnwindSafe(self.drive()).catch_unwind().await;
        let outcome = match caught {
            Ok(outcome) => outcome,
            Err(payload) => Err(PipelineError::Panicked {
                phase: self.phase,
                message: panic_message(payload.as_ref()),
            }),
        };

        if let Err(e) = self.downloader.close().await {
            tracing::warn!(error = %e, "failed to release session");
        }

        match &outcome {
            Ok(summary) => {
                self.enter(Phase::Done);
                tracing::info!(
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed(),
                    "run complete"
                );
            }
            Err(e) => {
                self.enter(Phase::Failed);
                tracing::error!(error = %e, "run failed");
            }
        }
        outcome
    }

    async fn drive(&mut self) -> Result<RunSummary, PipelineError> {
        let downloader = Arc::clone(&self.downloader);

        self.enter(Phase::Authenticating);
        self.phase_operation("authenticate")
            .run(|| downloader.authenticate())
            .await
            .map_err(|e| PipelineError::from_phase(Phase::Authenticating, e))?;

        self.enter(Phase::Discovering);
        let tasks = self
            .phase_operation("discover")
            .run(|| downloader.discover_tasks().try_collect::<Vec<_>>())
            .await
            .map_err(|e| PipelineError::from_phase(Phase::Discovering, e))?
            .value;
        tracing::info!(tasks = tasks.len(), "discovered tasks");
        warn_duplicate_labels(&tasks);

        self.enter(Phase::Downloading);
        let results = BoundedExecutor::new(self.limit, self.policy)
            .verbose(self.verbose)
            .on_task_failure(self.on_task_failure)
            .with_cancellation(self.cancel.clone())
            .run(Arc::clone(&downloader), tasks)
            .await?;

        self.enter(Phase::Reporting);
        let summary = RunSummary::from_results(&results, self.on_task_failure);
        downloader
            .report(&results)
            .await
            .map_err(PipelineError::Report)?;
        Ok(summary)
    }

    fn phase_operation(&self, label: &str) -> RetryableOperation {
        RetryableOperation::new(self.policy, label)
            .verbose(self.verbose)
            .with_cancellation(self.cancel.clone())
    }

    fn enter(&mut self, next: Phase) {
        tracing::info!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn warn_duplicate_labels<T: TaskLabel>(tasks: &[T]) {
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.label()) {
            tracing::warn!(task = task.label(), "duplicate task label; results will share it");
        }
    }
}
