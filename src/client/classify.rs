use hyper::StatusCode;

use crate::error::{Error, ErrorKind};

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Client errors that are reported on first occurrence and never retried.
pub fn is_terminal_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 404 | 422)
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::Unauthenticated,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        422 => ErrorKind::InvalidRequest,
        429 => ErrorKind::RateLimited,
        _ => ErrorKind::ServerError,
    }
}

/// Decide whether a failed attempt may be retried.
///
/// `status` is the HTTP status of the response, if one was received at all;
/// `error` is the failure raised by the attempt.
pub fn should_retry(status: Option<u16>, error: Option<&Error>) -> bool {
    if let Some(err) = error
        && matches!(err.kind(), ErrorKind::NetworkError | ErrorKind::TimeoutError)
    {
        return true;
    }
    status.is_some_and(is_retryable_status)
}

/// Pull a human message out of an error body.
///
/// Prefers the JSON `detail` field, then the status reason phrase, then a
/// generic `HTTP <code> error`. Never fails on malformed bodies.
pub fn extract_error_message(status: u16, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned())
        .and_then(|detail| match detail {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
            serde_json::Value::String(_) | serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });

    if let Some(detail) = detail {
        return detail;
    }

    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| ["HTTP ", &status.to_string(), " error"].concat())
}

/// Build the typed error for a non-2xx response.
pub fn error_for_status(status: u16, body: &[u8]) -> Error {
    Error::new(
        classify_status(status),
        Some(status),
        extract_error_message(status, body),
    )
}
