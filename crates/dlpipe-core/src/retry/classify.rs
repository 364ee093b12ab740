//! Classify HTTP status and curl errors into retry policy error kinds.

use super::error::ErrorKind;

/// Where a request was made; an auth rejection means different things in each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Logging in: 401/403 means bad credentials.
    Login,
    /// Fetching a task after login: 401/403 means the session is gone.
    Transfer,
}

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32, stage: Stage) -> ErrorKind {
    match code {
        401 | 403 => match stage {
            Stage::Login => ErrorKind::Permanent,
            Stage::Transfer => ErrorKind::Fatal,
        },
        408 | 425 | 429 => ErrorKind::Transient,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Permanent,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout()
        || e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
        || e.is_ssl_connect_error()
    {
        return ErrorKind::Transient;
    }
    ErrorKind::Permanent
}
