//! Blocking libcurl requests used by the manifest site.
//!
//! Callers run these inside `tokio::task::spawn_blocking`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::retry::{classify_curl_error, classify_http_status, CapabilityError, Stage};

/// Everything needed to issue one GET.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub url: String,
    /// Full header lines, e.g. "Authorization: Bearer abc".
    pub headers: Vec<String>,
    /// Cookie file to send from (and, for logins, to save into).
    pub cookie_jar: Option<PathBuf>,
    pub save_cookies: bool,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Set to stop the transfer at curl's next callback.
    pub abort: Arc<AtomicBool>,
}

impl Request {
    /// Guard that raises `abort` when the awaiting caller goes away.
    pub fn abort_on_drop(&self) -> AbortOnDrop {
        AbortOnDrop(Arc::clone(&self.abort))
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

/// Held by the async side of a blocking request. A cancelled or aborted
/// download drops its future, and with it this guard, so the curl thread
/// stops instead of finishing the transfer in the background.
pub(crate) struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn easy_for(req: &Request) -> Result<curl::easy::Easy, curl::Error> {
    let mut easy = curl::easy::Easy::new();
    easy.url(&req.url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(req.connect_timeout)?;
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.timeout(req.timeout)?;
    // The progress callback also fires while idle, so an abort is seen even when no bytes arrive.
    easy.progress(true)?;

    if !req.headers.is_empty() {
        let mut list = curl::easy::List::new();
        for line in &req.headers {
            list.append(line)?;
        }
        easy.http_headers(list)?;
    }
    if let Some(jar) = &req.cookie_jar {
        // cookie_file also turns on the cookie engine when the file does not exist yet.
        easy.cookie_file(jar)?;
        if req.save_cookies {
            easy.cookie_jar(jar)?;
        }
    }
    Ok(easy)
}

fn cancelled(url: &str) -> CapabilityError {
    CapabilityError::permanent(format!("GET {} cancelled", url))
}

fn curl_failure(url: &str, e: curl::Error) -> CapabilityError {
    CapabilityError::new(classify_curl_error(&e), format!("GET {} failed", url)).with_source(e)
}

fn status_failure(url: &str, code: u32, stage: Stage) -> CapabilityError {
    CapabilityError::new(
        classify_http_status(code, stage),
        format!("GET {} returned HTTP {}", url, code),
    )
}

/// GET `req.url`, discarding the body. Succeeds on any 2xx.
pub(crate) fn probe(req: &Request, stage: Stage) -> Result<u32, CapabilityError> {
    let mut easy = easy_for(req).map_err(|e| curl_failure(&req.url, e))?;
    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| Ok(data.len()))
            .map_err(|e| curl_failure(&req.url, e))?;
        transfer
            .progress_function(|_, _, _, _| !req.aborted())
            .map_err(|e| curl_failure(&req.url, e))?;
        let performed = transfer.perform();
        if req.aborted() {
            return Err(cancelled(&req.url));
        }
        performed.map_err(|e| curl_failure(&req.url, e))?;
    }
    let code = easy
        .response_code()
        .map_err(|e| curl_failure(&req.url, e))?;
    if !(200..300).contains(&code) {
        return Err(status_failure(&req.url, code, stage));
    }
    Ok(code)
}

/// GET `req.url` into `dest`. The body goes to a fresh temp file next to
/// `dest` that is renamed over it on success, so concurrent requests for
/// the same destination never share a partial file.
/// Returns the number of bytes written.
pub(crate) fn fetch_to_file(req: &Request, dest: &Path) -> Result<u64, CapabilityError> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| {
        CapabilityError::permanent(format!("creating {}", dir.display())).with_source(e)
    })?;
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut part = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| {
            CapabilityError::permanent(format!("creating temp file in {}", dir.display()))
                .with_source(e)
        })?;

    let mut written = 0u64;
    let mut write_err: Option<std::io::Error> = None;
    let mut easy = easy_for(req).map_err(|e| curl_failure(&req.url, e))?;
    let performed = {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                if req.aborted() {
                    return Ok(0);
                }
                match part.write_all(data) {
                    Ok(()) => {
                        written += data.len() as u64;
                        Ok(data.len())
                    }
                    Err(e) => {
                        tracing::warn!("download write failed: {}", e);
                        write_err = Some(e);
                        Ok(0) // abort transfer
                    }
                }
            })
            .map_err(|e| curl_failure(&req.url, e))?;
        transfer
            .progress_function(|_, _, _, _| !req.aborted())
            .map_err(|e| curl_failure(&req.url, e))?;
        transfer.perform()
    };

    // `part` is deleted on drop unless persisted.
    if req.aborted() {
        return Err(cancelled(&req.url));
    }
    let bytes = match (performed, write_err) {
        (_, Some(e)) => {
            return Err(CapabilityError::permanent(format!(
                "writing {}",
                part.path().display()
            ))
            .with_source(e))
        }
        (Err(e), None) => return Err(curl_failure(&req.url, e)),
        (Ok(()), None) => match easy.response_code() {
            Ok(code) if (200..300).contains(&code) => written,
            Ok(code) => return Err(status_failure(&req.url, code, Stage::Transfer)),
            Err(e) => return Err(curl_failure(&req.url, e)),
        },
    };

    part.as_file().sync_all().map_err(|e| {
        CapabilityError::transient(format!("syncing {}", part.path().display())).with_source(e)
    })?;
    if req.aborted() {
        return Err(cancelled(&req.url));
    }
    part.persist(dest).map_err(|e| {
        CapabilityError::transient(format!("finalizing {}", dest.display())).with_source(e.error)
    })?;
    Ok(bytes)
}
