//! Bounded executor for the download phase.
//!
//! Keeps up to `limit` downloads in flight; when one finishes, the next task
//! is started until the list is empty (a sliding window, not fixed batches).
//! Every download is wrapped in its own `RetryableOperation`, so a task that
//! is backing off holds only its own slot.

use futures::FutureExt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::capability::{Downloader, TaskLabel};
use crate::config::TaskFailurePolicy;
use crate::error::PipelineError;
use crate::orchestrator::Phase;
use crate::result::{DownloadResult, PipelineResult, TaskOutcome};
use crate::retry::{BackoffPolicy, CapabilityError, RetryableOperation};

#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    limit: NonZeroUsize,
    policy: BackoffPolicy,
    verbose: bool,
    on_task_failure: TaskFailurePolicy,
    cancel: CancellationToken,
}

impl BoundedExecutor {
    pub fn new(limit: NonZeroUsize, policy: BackoffPolicy) -> Self {
        Self {
            limit,
            policy,
            verbose: false,
            on_task_failure: TaskFailurePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn on_task_failure(mut self, policy: TaskFailurePolicy) -> Self {
        self.on_task_failure = policy;
        self
    }

    /// Abort in-flight downloads when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Downloads every task and returns one result per task.
    ///
    /// Returns early (aborting whatever is still in flight) on a fatal task
    /// error, on any task failure under `TaskFailurePolicy::Abort`, or on
    /// cancellation.
    pub async fn run<D: Downloader>(
        &self,
        downloader: Arc<D>,
        tasks: Vec<D::Task>,
    ) -> Result<PipelineResult<D::Task, D::Output>, PipelineError> {
        let total = tasks.len();
        let mut results = PipelineResult::with_capacity(total);
        if total == 0 {
            return Ok(results);
        }

        let mut pending = tasks.into_iter();
        let mut join_set = JoinSet::new();

        loop {
            while join_set.len() < self.limit.get() {
                let Some(task) = pending.next() else {
                    break;
                };
                let retry = RetryableOperation::new(self.policy, task.label())
                    .verbose(self.verbose)
                    .with_cancellation(self.cancel.clone());
                join_set.spawn(download_one(Arc::clone(&downloader), task, retry));
            }

            if join_set.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(PipelineError::Cancelled { phase: Phase::Downloading });
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let DownloadResult {
                task,
                outcome,
                attempts,
            } = joined?;

            let outcome = match outcome {
                TaskOutcome::Failed(err) if err.is_cancelled() => {
                    join_set.abort_all();
                    return Err(PipelineError::Cancelled {
                        phase: Phase::Downloading,
                    });
                }
                TaskOutcome::Failed(err) if err.is_fatal() => {
                    join_set.abort_all();
                    tracing::error!(task = task.label(), error = %err, "fatal download failure; aborting batch");
                    return Err(PipelineError::FatalTask {
                        task: task.label().to_owned(),
                        source: err,
                    });
                }
                TaskOutcome::Failed(err) if self.on_task_failure == TaskFailurePolicy::Abort => {
                    join_set.abort_all();
                    tracing::error!(task = task.label(), error = %err, "download failed; aborting batch");
                    return Err(PipelineError::TaskAborted {
                        task: task.label().to_owned(),
                        source: err,
                    });
                }
                TaskOutcome::Failed(err) => {
                    tracing::warn!(task = task.label(), attempts, error = %err, "download failed");
                    TaskOutcome::Failed(err)
                }
                TaskOutcome::Succeeded(output) => {
                    tracing::info!(task = task.label(), attempts, "downloaded");
                    TaskOutcome::Succeeded(output)
                }
            };

            results.push(DownloadResult {
                task,
                outcome,
                attempts,
            });
            tracing::debug!(done = results.len(), total, "download progress");
        }

        Ok(results)
    }
}

/// Runs one task's retry sequence to a terminal state. A panicking download
/// counts as a permanent failure of that task.
async fn download_one<D: Downloader>(
    downloader: Arc<D>,
    task: D::Task,
    retry: RetryableOperation,
) -> DownloadResult<D::Task, D::Output> {
    let result = retry
        .run(|| {
            AssertUnwindSafe(downloader.download(&task))
                .catch_unwind()
                .map(|caught| {
                    caught.unwrap_or_else(|_| Err(CapabilityError::permanent("download panicked")))
                })
        })
        .await;

    let (outcome, attempts) = match result {
        Ok(done) => (TaskOutcome::Succeeded(done.value), done.attempts),
        Err(err) => {
            let attempts = err.attempts();
            (TaskOutcome::Failed(err), attempts)
        }
    };
    DownloadResult {
        task,
        outcome,
        attempts,
    }
}
