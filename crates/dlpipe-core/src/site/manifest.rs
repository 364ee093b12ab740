//! A site described by a TOML manifest of HTTP URLs.
//!
//! Settings come from the opaque `[site]` table of the pipeline config:
//!
//! ```toml
//! [site]
//! manifest = "tasks.toml"
//! output_dir = "downloads"
//! auth_url = "https://example.com/api/session"   # optional
//! token_env = "EXAMPLE_TOKEN"                     # optional bearer token
//! ```
//!
//! The manifest lists one `[[task]]` per file (`name`, `url`, optional `file`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::TempDir;

use super::http::{self, Request};
use crate::capability::{Downloader, TaskLabel};
use crate::report;
use crate::result::PipelineResult;
use crate::retry::{CapabilityError, Stage};

/// Name of the manifest of failed tasks written next to the downloads.
pub const FAILED_MANIFEST: &str = "failed.toml";

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestSettings {
    /// Path to the TOML task list.
    pub manifest: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Login URL; when set, `authenticate` must get a 2xx from it.
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Environment variable holding a bearer token sent with every request.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Only download tasks with these names (empty = all).
    #[serde(default)]
    pub only: Vec<String>,
}

impl ManifestSettings {
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        toml::Value::Table(table.clone())
            .try_into()
            .context("invalid [site] settings for the manifest site")
    }
}

/// One entry of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTask {
    pub name: String,
    pub url: String,
    /// File name under the output dir; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl ManifestTask {
    /// File name to save under, with path separators and leading dots neutralized.
    pub fn file_name(&self) -> String {
        let raw = self.file.as_deref().unwrap_or(&self.name);
        let cleaned: String = raw
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c,
            })
            .collect();
        let trimmed = cleaned.trim_start_matches('.');
        if trimmed.is_empty() {
            "download.bin".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl TaskLabel for ManifestTask {
    fn label(&self) -> &str {
        &self.name
    }
}

/// Task list file format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "task")]
    pub tasks: Vec<ManifestTask>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing manifest {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Login state: a private cookie jar that lives as long as the session.
struct Session {
    dir: TempDir,
}

impl Session {
    fn open() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("dlpipe-session-").tempdir()?;
        Ok(Self { dir })
    }

    fn cookie_jar(&self) -> PathBuf {
        self.dir.path().join("cookies.txt")
    }
}

pub struct ManifestSite {
    settings: ManifestSettings,
    headers: Vec<String>,
    session: Mutex<Option<Session>>,
    /// Output file name -> the task that owns it, rebuilt on each discovery.
    claims: Mutex<HashMap<String, ManifestTask>>,
}

impl ManifestSite {
    /// Builds the site; reads the bearer token from `token_env` if configured.
    pub fn new(settings: ManifestSettings) -> Result<Self> {
        let mut headers: Vec<String> = settings
            .headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k.trim(), v.trim()))
            .collect();
        if let Some(var) = &settings.token_env {
            let token = std::env::var(var)
                .with_context(|| format!("environment variable {} is not set", var))?;
            headers.push(format!("Authorization: Bearer {}", token.trim()));
        }
        Ok(Self {
            settings,
            headers,
            session: Mutex::new(None),
            claims: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, url: &str, save_cookies: bool) -> Request {
        let cookie_jar = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Session::cookie_jar);
        Request {
            url: url.to_string(),
            headers: self.headers.clone(),
            cookie_jar,
            save_cookies,
            connect_timeout: Duration::from_secs(self.settings.connect_timeout_secs),
            timeout: Duration::from_secs(self.settings.timeout_secs),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_session(&self) -> Result<(), CapabilityError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_none() {
            let opened = Session::open().map_err(|e| {
                CapabilityError::transient("creating session directory").with_source(e)
            })?;
            tracing::debug!(dir = %opened.dir.path().display(), "session opened");
            *session = Some(opened);
        }
        Ok(())
    }

    fn wants(&self, task: &ManifestTask) -> bool {
        self.settings.only.is_empty() || self.settings.only.iter().any(|n| n == &task.name)
    }

    /// The first task (in manifest order) to use an output file name owns it.
    /// Identical duplicate entries share ownership.
    fn claim_destinations(&self, tasks: &[ManifestTask]) {
        let mut claims = HashMap::new();
        for task in tasks {
            match claims.entry(task.file_name()) {
                Entry::Vacant(slot) => {
                    slot.insert(task.clone());
                }
                Entry::Occupied(owner) if owner.get() != task => {
                    tracing::warn!(
                        task = %task.name,
                        owner = %owner.get().name,
                        file = %owner.key(),
                        "output file already claimed by another task; it will fail"
                    );
                }
                Entry::Occupied(_) => {}
            }
        }
        *self.claims.lock().unwrap_or_else(PoisonError::into_inner) = claims;
    }

    fn check_destination(&self, task: &ManifestTask, file_name: &str) -> Result<(), CapabilityError> {
        let claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        match claims.get(file_name) {
            Some(owner) if owner != task => Err(CapabilityError::permanent(format!(
                "output file {} is already used by task {}",
                file_name, owner.name
            ))),
            _ => Ok(()),
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CapabilityError>
where
    F: FnOnce() -> Result<T, CapabilityError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CapabilityError::transient("request worker failed").with_source(e))?
}

fn io_failure(what: String, e: std::io::Error) -> CapabilityError {
    let err = match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            CapabilityError::permanent(what)
        }
        _ => CapabilityError::transient(what),
    };
    err.with_source(e)
}

#[async_trait]
impl Downloader for ManifestSite {
    type Task = ManifestTask;
    type Output = Fetched;

    async fn authenticate(&self) -> Result<(), CapabilityError> {
        self.ensure_session()?;
        let Some(url) = self.settings.auth_url.as_deref() else {
            tracing::debug!("no auth_url configured; skipping login");
            return Ok(());
        };
        let req = self.request(url, true);
        let _abort = req.abort_on_drop();
        let code = blocking(move || http::probe(&req, Stage::Login)).await?;
        tracing::info!(url, status = code, "logged in");
        Ok(())
    }

    fn discover_tasks(&self) -> BoxStream<'_, Result<ManifestTask, CapabilityError>> {
        let path = self.settings.manifest.clone();
        stream::once(async move {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_failure(format!("reading manifest {}", path.display()), e))?;
            let manifest = Manifest::parse(&text).map_err(|e| {
                CapabilityError::permanent(format!("parsing manifest {}: {:#}", path.display(), e))
            })?;
            let tasks: Vec<ManifestTask> = manifest
                .tasks
                .into_iter()
                .filter(|task| self.wants(task))
                .collect();
            self.claim_destinations(&tasks);
            Ok::<_, CapabilityError>(tasks)
        })
        .map_ok(|tasks| stream::iter(tasks.into_iter().map(Ok::<_, CapabilityError>)))
        .try_flatten()
        .boxed()
    }

    async fn download(&self, task: &ManifestTask) -> Result<Fetched, CapabilityError> {
        let file_name = task.file_name();
        self.check_destination(task, &file_name)?;
        let req = self.request(&task.url, false);
        let _abort = req.abort_on_drop();
        let dest = self.settings.output_dir.join(file_name);
        let path = dest.clone();
        let bytes = blocking(move || http::fetch_to_file(&req, &dest)).await?;
        tracing::debug!(task = %task.name, bytes, path = %path.display(), "saved");
        Ok(Fetched { path, bytes })
    }

    async fn report(
        &self,
        results: &PipelineResult<ManifestTask, Fetched>,
    ) -> Result<(), CapabilityError> {
        println!("{}", report::render(results));

        let failed_path = self.settings.output_dir.join(FAILED_MANIFEST);
        let failed = Manifest {
            tasks: results.failed().map(|r| r.task.clone()).collect(),
        };
        if failed.tasks.is_empty() {
            match tokio::fs::remove_file(&failed_path).await {
                Ok(()) => tracing::debug!(path = %failed_path.display(), "removed stale failed-task manifest"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_failure(format!("removing {}", failed_path.display()), e)),
            }
            return Ok(());
        }

        let text = failed.to_toml().map_err(|e| {
            CapabilityError::permanent(format!("serializing failed tasks: {:#}", e))
        })?;
        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .map_err(|e| io_failure(format!("creating {}", self.settings.output_dir.display()), e))?;
        tokio::fs::write(&failed_path, text)
            .await
            .map_err(|e| io_failure(format!("writing {}", failed_path.display()), e))?;
        println!(
            "{} failed task(s) written to {}; re-run with that file as the manifest",
            failed.tasks.len(),
            failed_path.display()
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), CapabilityError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session
                .dir
                .close()
                .map_err(|e| CapabilityError::transient("removing session directory").with_source(e))?;
            tracing::debug!("session closed");
        }
        Ok(())
    }
}
