//! The capability contract a site implementation provides.
//!
//! The orchestrator is generic over `Downloader` and knows nothing about how a
//! site logs in, lists its work, or fetches a single item.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::result::PipelineResult;
use crate::retry::CapabilityError;

/// Something that can name itself in logs and reports.
pub trait TaskLabel {
    fn label(&self) -> &str;
}

impl TaskLabel for String {
    fn label(&self) -> &str {
        self
    }
}

/// A site-specific downloader.
///
/// Implementations own the shared session (browser, cookie jar, connection)
/// and release it in `close`, which the orchestrator calls exactly once on
/// every exit path.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    /// One unit of download work; opaque to the orchestrator.
    type Task: TaskLabel + Send + Sync + 'static;
    /// Payload produced by a successful download.
    type Output: Send + Sync + 'static;

    /// Log in. Must be safe to call again after a failure.
    async fn authenticate(&self) -> Result<(), CapabilityError>;

    /// Lists the tasks to download as a finite stream. Each call starts over
    /// from scratch; an `Err` item fails the whole discovery attempt.
    fn discover_tasks(&self) -> BoxStream<'_, Result<Self::Task, CapabilityError>>;

    /// Download one task. May be called again for the same task after a
    /// transient failure.
    async fn download(&self, task: &Self::Task) -> Result<Self::Output, CapabilityError>;

    /// Receives the full result set once the download phase is over. Never retried.
    async fn report(
        &self,
        results: &PipelineResult<Self::Task, Self::Output>,
    ) -> Result<(), CapabilityError>;

    /// Release the session.
    async fn close(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}
