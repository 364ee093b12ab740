//! Error types shared by the capability contract and the retry loop.

use std::fmt;
use thiserror::Error;

/// High-level classification of a capability failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network/timeout-style failure; the backoff policy retries it.
    Transient,
    /// Will not succeed on retry (bad request, missing resource, bad credentials).
    Permanent,
    /// Aborts the whole run regardless of remaining retry budget (e.g. session lost).
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Error returned by a `Downloader` capability call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CapabilityError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CapabilityError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Attach the underlying cause.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Why a retry sequence stopped without a success.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Attempt budget spent and the transient failure persists.
    #[error("retries exhausted after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: CapabilityError,
    },
    /// The capability reported a permanent failure; no retry was made.
    #[error("not retryable (attempt {attempts})")]
    Rejected {
        attempts: u32,
        #[source]
        source: CapabilityError,
    },
    /// The capability signalled a fatal condition.
    #[error("fatal failure on attempt {attempts}")]
    Fatal {
        attempts: u32,
        #[source]
        source: CapabilityError,
    },
    /// The run was cancelled while this operation was in flight or waiting.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl RetryError {
    /// Number of attempts made before stopping.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Rejected { attempts, .. }
            | RetryError::Fatal { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RetryError::Fatal { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The last capability failure, if the sequence ended on one.
    pub fn last_error(&self) -> Option<&CapabilityError> {
        match self {
            RetryError::Exhausted { source, .. }
            | RetryError::Rejected { source, .. }
            | RetryError::Fatal { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}
