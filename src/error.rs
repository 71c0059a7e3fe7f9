use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Stable classification of every failure the client can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    NotFound,
    InvalidRequest,
    RateLimited,
    ServerError,
    NetworkError,
    TimeoutError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::TimeoutError => "timeout_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure: the kind, the HTTP status when one was received, and a
/// human-readable message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, None, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::TimeoutError,
            None,
            format!("request timed out after {after:?}"),
        )
    }

    pub fn cancelled() -> Self {
        Self::network("request cancelled")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, None, message)
    }

    pub fn server(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, status, message)
    }

    /// Wraps the last failure of an exhausted retry loop.
    pub fn retries_exhausted(attempts: u32, last: &Error) -> Self {
        Self::server(
            last.status,
            format!("request failed after {attempts} attempts: {}", last.message),
        )
    }

    /// Whether another attempt of the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        crate::client::should_retry(self.status, Some(self))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns a user-friendly suggestion for how to resolve this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self.kind {
            ErrorKind::Unauthenticated => {
                Some("Check that RAGSTREAM_API_KEY or api_key in the config file is set")
            }
            ErrorKind::Forbidden => Some("The API key is valid but lacks access to this resource"),
            ErrorKind::RateLimited => Some("Too many requests, slow down"),
            ErrorKind::NetworkError | ErrorKind::TimeoutError => {
                Some("Check your connection and the configured base_url")
            }
            ErrorKind::ServerError if self.status.is_some_and(|s| s >= 500) => {
                Some("The service is having trouble, try again in a few minutes")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
