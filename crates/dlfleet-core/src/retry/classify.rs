//! Classify item errors into retry policy error kinds.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ItemError;
use crate::retry::policy::ErrorKind;

fn http_status() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"HTTP Error (\d{3})").expect("http status pattern"))
}

/// Classify an HTTP status code reported by a tool.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code),
        400..=499 => ErrorKind::Permanent,
        _ => ErrorKind::Failed,
    }
}

/// Classify an item error for retry decisions.
pub fn classify(e: &ItemError) -> ErrorKind {
    match e {
        ItemError::Spawn(_) => ErrorKind::Spawn,
        ItemError::BackendTerminalAmbiguous => ErrorKind::Ambiguous,
        ItemError::Failed(msg) => http_status()
            .captures(msg)
            .and_then(|c| c[1].parse::<u16>().ok())
            .map(classify_http_status)
            .unwrap_or(ErrorKind::Failed),
        ItemError::Stalled(_) | ItemError::TimeLimitExceeded | ItemError::Aborted => {
            ErrorKind::Control
        }
    }
}
