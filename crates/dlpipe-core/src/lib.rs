pub mod config;
pub mod logging;

pub mod capability;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod report;
pub mod result;
pub mod retry;
pub mod site;

#[cfg(test)]
pub(crate) mod test_support;

pub use capability::{Downloader, TaskLabel};
pub use error::PipelineError;
pub use orchestrator::{Phase, PipelineOrchestrator, RunSummary};
pub use result::{DownloadResult, PipelineResult, TaskOutcome};
