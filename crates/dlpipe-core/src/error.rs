//! Run-level errors: anything that ends the pipeline in the `Failed` state.

use thiserror::Error;

use crate::config::ConfigError;
use crate::orchestrator::Phase;
use crate::retry::{CapabilityError, RetryError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// Authentication or discovery gave up.
    #[error("{phase} phase failed")]
    Phase {
        phase: Phase,
        #[source]
        source: RetryError,
    },

    /// A download signalled a fatal condition (e.g. the session was lost).
    #[error("download of {task} hit a fatal condition")]
    FatalTask {
        task: String,
        #[source]
        source: RetryError,
    },

    /// A task failed while the failure policy is `abort`.
    #[error("download phase aborted: task {task} failed")]
    TaskAborted {
        task: String,
        #[source]
        source: RetryError,
    },

    #[error("report failed")]
    Report(#[source] CapabilityError),

    /// A capability call outside the download phase panicked.
    #[error("{phase} phase panicked: {message}")]
    Panicked { phase: Phase, message: String },

    #[error("run cancelled during {phase} phase")]
    Cancelled { phase: Phase },

    #[error("download worker failed")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Map a phase's retry failure, keeping cancellation distinct.
    pub(crate) fn from_phase(phase: Phase, source: RetryError) -> Self {
        if source.is_cancelled() {
            PipelineError::Cancelled { phase }
        } else {
            PipelineError::Phase { phase, source }
        }
    }
}
