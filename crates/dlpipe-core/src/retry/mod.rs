//! Retry and backoff policy.
//!
//! This module encapsulates error classification (transient, permanent,
//! fatal) and exponential backoff decisions so that every phase of the
//! pipeline and every task download share one consistent policy.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify_curl_error, classify_http_status, Stage};
pub use error::{CapabilityError, ErrorKind, RetryError};
pub use policy::{Backoff, BackoffPolicy};
pub use run::{Attempted, RetryableOperation};
