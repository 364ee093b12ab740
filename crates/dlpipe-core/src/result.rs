//! Per-task outcomes and the collected result set of a download phase.

use crate::capability::TaskLabel;
use crate::retry::RetryError;

/// Terminal state of one task.
#[derive(Debug)]
pub enum TaskOutcome<O> {
    Succeeded(O),
    Failed(RetryError),
}

/// A task paired with its outcome.
#[derive(Debug)]
pub struct DownloadResult<T, O> {
    pub task: T,
    pub outcome: TaskOutcome<O>,
    /// Attempts made, including the first.
    pub attempts: u32,
}

impl<T: TaskLabel, O> DownloadResult<T, O> {
    pub fn label(&self) -> &str {
        self.task.label()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded(_))
    }

    pub fn output(&self) -> Option<&O> {
        match &self.outcome {
            TaskOutcome::Succeeded(o) => Some(o),
            TaskOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RetryError> {
        match &self.outcome {
            TaskOutcome::Succeeded(_) => None,
            TaskOutcome::Failed(e) => Some(e),
        }
    }
}

/// One `DownloadResult` per discovered task, in completion order.
#[derive(Debug)]
pub struct PipelineResult<T, O> {
    results: Vec<DownloadResult<T, O>>,
}

impl<T, O> Default for PipelineResult<T, O> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
        }
    }
}

impl<T: TaskLabel, O> PipelineResult<T, O> {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            results: Vec::with_capacity(n),
        }
    }

    pub(crate) fn push(&mut self, result: DownloadResult<T, O>) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DownloadResult<T, O>> {
        self.results.iter()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &DownloadResult<T, O>> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DownloadResult<T, O>> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// Labels of failed tasks, sorted, for re-running just those.
    pub fn failed_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.failed().map(|r| r.label().to_owned()).collect();
        labels.sort();
        labels
    }

    pub fn get(&self, label: &str) -> Option<&DownloadResult<T, O>> {
        self.results.iter().find(|r| r.label() == label)
    }
}

impl<'a, T, O> IntoIterator for &'a PipelineResult<T, O> {
    type Item = &'a DownloadResult<T, O>;
    type IntoIter = std::slice::Iter<'a, DownloadResult<T, O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
