//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves a login endpoint that checks a bearer token and sets a session
//! cookie, plus a set of files that require that cookie. Individual files can
//! be made flaky (503 a few times), missing (404), session-expired (401) or
//! stalled (the request is read and never answered).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

pub const SESSION_COOKIE: &str = "session=s3cr3t";

#[derive(Debug, Clone, Default)]
pub struct FileServerOptions {
    /// Token `GET /login` expects in `Authorization: Bearer <token>`.
    pub token: String,
    /// Path (e.g. "/files/a.bin") -> body.
    pub files: HashMap<String, Vec<u8>>,
    /// Path -> number of 503 responses before serving normally.
    pub flaky: HashMap<String, u32>,
    /// Paths that answer 401 as if the session expired.
    pub expired: Vec<String>,
    /// Paths whose requests are never answered.
    pub stalled: Vec<String>,
}

pub struct FileServer {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, u32>>>,
}

impl FileServer {
    /// Number of requests seen for `path`.
    pub fn hits(&self, path: &str) -> u32 {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

/// Starts a server in a background thread. The server runs until the process exits.
pub fn start(opts: FileServerOptions) -> FileServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(Mutex::new(HashMap::new()));
    let state = Arc::new(Mutex::new(opts));
    let hits_srv = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&state);
            let hits = Arc::clone(&hits_srv);
            thread::spawn(move || handle(stream, &state, &hits));
        }
    });
    FileServer {
        base_url: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    state: &Mutex<FileServerOptions>,
    hits: &Mutex<HashMap<String, u32>>,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let req = parse_request(request);
    *hits.lock().unwrap().entry(req.path.clone()).or_insert(0) += 1;

    if !req.method.eq_ignore_ascii_case("GET") {
        respond(&mut stream, "405 Method Not Allowed", &[], b"");
        return;
    }

    let mut opts = state.lock().unwrap();
    if req.path == "/login" {
        let expected = format!("Bearer {}", opts.token);
        if req.authorization.as_deref() == Some(expected.as_str()) {
            let cookie = format!("Set-Cookie: {}; Path=/", SESSION_COOKIE);
            respond(&mut stream, "200 OK", &[cookie.as_str()], b"welcome");
        } else {
            respond(&mut stream, "401 Unauthorized", &[], b"bad token");
        }
        return;
    }

    if opts.stalled.contains(&req.path) {
        drop(opts);
        thread::sleep(std::time::Duration::from_secs(60));
        return;
    }
    if opts.expired.contains(&req.path) {
        respond(&mut stream, "401 Unauthorized", &[], b"session expired");
        return;
    }
    let has_session = req
        .cookie
        .as_deref()
        .map(|c| c.contains(SESSION_COOKIE))
        .unwrap_or(false);
    if !has_session {
        respond(&mut stream, "403 Forbidden", &[], b"login first");
        return;
    }
    if let Some(left) = opts.flaky.get_mut(&req.path) {
        if *left > 0 {
            *left -= 1;
            respond(&mut stream, "503 Service Unavailable", &[], b"busy");
            return;
        }
    }
    match opts.files.get(&req.path) {
        Some(body) => {
            let body = body.clone();
            drop(opts);
            respond(&mut stream, "200 OK", &[], &body);
        }
        None => respond(&mut stream, "404 Not Found", &[], b"no such file"),
    }
}

fn respond(stream: &mut std::net::TcpStream, status: &str, headers: &[&str], body: &[u8]) {
    let mut head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        body.len()
    );
    for h in headers {
        head.push_str(h);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

struct ParsedRequest {
    method: String,
    path: String,
    authorization: Option<String>,
    cookie: Option<String>,
}

fn parse_request(request: &str) -> ParsedRequest {
    let mut parsed = ParsedRequest {
        method: String::new(),
        path: String::new(),
        authorization: None,
        cookie: None,
    };
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if parsed.method.is_empty() {
            let mut parts = line.split_whitespace();
            parsed.method = parts.next().unwrap_or("").to_string();
            parsed.path = parts.next().unwrap_or("").to_string();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("authorization") {
                parsed.authorization = Some(value.trim().to_string());
            } else if name.eq_ignore_ascii_case("cookie") {
                parsed.cookie = Some(value.trim().to_string());
            }
        }
    }
    parsed
}
