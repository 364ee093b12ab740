//! Scriptable in-memory `Downloader` for executor and orchestrator tests.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::capability::Downloader;
use crate::result::PipelineResult;
use crate::retry::{CapabilityError, ErrorKind};

pub(crate) fn task_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("task-{}", i)).collect()
}

/// Counters and an event log shared between a `FakeSite` and the test.
#[derive(Default)]
pub(crate) struct Tally {
    auth_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    download_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    report_calls: AtomicUsize,
    reported: Mutex<Option<(usize, Vec<String>)>>,
    close_calls: AtomicUsize,
    events: Mutex<Vec<(String, Instant)>>,
}

impl Tally {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push((event.into(), Instant::now()));
    }

    pub(crate) fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn report_calls(&self) -> usize {
        self.report_calls.load(Ordering::SeqCst)
    }

    /// (result count, failed labels) seen by the last `report` call.
    pub(crate) fn reported(&self) -> Option<(usize, Vec<String>)> {
        self.reported.lock().unwrap().clone()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Event names in call order, with download events collapsed to "download".
    pub(crate) fn phases(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (name, _) in self.events.lock().unwrap().iter() {
            let name = if name.starts_with("download:") {
                "download".to_string()
            } else {
                name.clone()
            };
            if out.last() != Some(&name) {
                out.push(name);
            }
        }
        out
    }

    /// Time of the first event with this name.
    pub(crate) fn first(&self, event: &str) -> Option<Instant> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, at)| *at)
    }
}

pub(crate) struct FakeSite {
    tasks: Vec<String>,
    tally: Arc<Tally>,
    auth_failures: Mutex<u32>,
    auth_kind: ErrorKind,
    auth_panics: bool,
    discover_failures: Mutex<u32>,
    download_delay: Duration,
    task_delays: HashMap<String, Duration>,
    transient_failures: Mutex<HashMap<String, u32>>,
    always_failing: HashSet<String>,
    fatal: HashSet<String>,
    panicking: HashSet<String>,
    report_fails: bool,
}

impl FakeSite {
    pub(crate) fn new(tasks: Vec<String>) -> (Self, Arc<Tally>) {
        let tally = Arc::new(Tally::default());
        let site = Self {
            tasks,
            tally: Arc::clone(&tally),
            auth_failures: Mutex::new(0),
            auth_kind: ErrorKind::Transient,
            auth_panics: false,
            discover_failures: Mutex::new(0),
            download_delay: Duration::ZERO,
            task_delays: HashMap::new(),
            transient_failures: Mutex::new(HashMap::new()),
            always_failing: HashSet::new(),
            fatal: HashSet::new(),
            panicking: HashSet::new(),
            report_fails: false,
        };
        (site, tally)
    }

    /// First `n` authenticate calls fail with `kind`.
    pub(crate) fn with_auth_failures(mut self, n: u32, kind: ErrorKind) -> Self {
        self.auth_failures = Mutex::new(n);
        self.auth_kind = kind;
        self
    }

    pub(crate) fn with_panicking_auth(mut self) -> Self {
        self.auth_panics = true;
        self
    }

    /// First `n` discovery attempts fail transiently after yielding one task.
    pub(crate) fn with_discover_failures(mut self, n: u32) -> Self {
        self.discover_failures = Mutex::new(n);
        self
    }

    pub(crate) fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub(crate) fn with_task_delay(mut self, task: &str, delay: Duration) -> Self {
        self.task_delays.insert(task.to_string(), delay);
        self
    }

    pub(crate) fn with_transient_failures(self, task: &str, n: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(task.to_string(), n);
        self
    }

    pub(crate) fn with_always_failing(mut self, task: &str) -> Self {
        self.always_failing.insert(task.to_string());
        self
    }

    pub(crate) fn with_fatal(mut self, task: &str) -> Self {
        self.fatal.insert(task.to_string());
        self
    }

    pub(crate) fn with_panicking(mut self, task: &str) -> Self {
        self.panicking.insert(task.to_string());
        self
    }

    pub(crate) fn with_failing_report(mut self) -> Self {
        self.report_fails = true;
        self
    }

    fn take_one(counter: &Mutex<u32>) -> bool {
        let mut left = counter.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Downloader for FakeSite {
    type Task = String;
    type Output = String;

    async fn authenticate(&self) -> Result<(), CapabilityError> {
        self.tally.auth_calls.fetch_add(1, Ordering::SeqCst);
        self.tally.record("authenticate");
        if self.auth_panics {
            panic!("login form changed");
        }
        if Self::take_one(&self.auth_failures) {
            return Err(CapabilityError::new(self.auth_kind, "login rejected"));
        }
        Ok(())
    }

    fn discover_tasks(&self) -> BoxStream<'_, Result<String, CapabilityError>> {
        self.tally.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.tally.record("discover");
        let mut items: Vec<Result<String, CapabilityError>> =
            self.tasks.iter().cloned().map(Ok).collect();
        if Self::take_one(&self.discover_failures) {
            items.truncate(1);
            items.push(Err(CapabilityError::transient("listing page timed out")));
        }
        stream::iter(items).boxed()
    }

    async fn download(&self, task: &String) -> Result<String, CapabilityError> {
        self.tally.download_calls.fetch_add(1, Ordering::SeqCst);
        self.tally.record(format!("download:{}", task));
        let now = self.tally.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.tally.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .task_delays
            .get(task)
            .copied()
            .unwrap_or(self.download_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.tally.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(task) {
            panic!("scraper bug on {}", task);
        }
        if self.fatal.contains(task) {
            return Err(CapabilityError::fatal("session expired"));
        }
        if self.always_failing.contains(task) {
            return Err(CapabilityError::transient("connection reset"));
        }
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(task) {
                if *left > 0 {
                    *left -= 1;
                    return Err(CapabilityError::transient("503 from server"));
                }
            }
        }
        Ok(format!("payload:{}", task))
    }

    async fn report(
        &self,
        results: &PipelineResult<String, String>,
    ) -> Result<(), CapabilityError> {
        self.tally.report_calls.fetch_add(1, Ordering::SeqCst);
        self.tally.record("report");
        *self.tally.reported.lock().unwrap() = Some((results.len(), results.failed_labels()));
        if self.report_fails {
            return Err(CapabilityError::permanent("report sink unavailable"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CapabilityError> {
        self.tally.close_calls.fetch_add(1, Ordering::SeqCst);
        self.tally.record("close");
        Ok(())
    }
}
