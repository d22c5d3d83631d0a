//! Error types for pulith-http.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;

use crate::data::{Config, Request, Response};

/// Boxed error used for transport, hook and body stream sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("the `timeout` option cannot be greater than {max} milliseconds, got {requested}")]
    TimeoutOutOfRange { requested: u128, max: u64 },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("no transport configured: enable the `reqwest` feature or set `Options::transport`")]
    MissingTransport,

    #[error(transparent)]
    Timeout(Box<TimeoutError>),

    #[error(transparent)]
    Http(Box<HttpError>),

    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("request aborted")]
    Aborted,

    #[error("failed to decode response body: {0}")]
    Decode(#[source] BoxError),

    #[error("body stream error: {0}")]
    Body(#[source] BoxError),

    #[error("hook failed: {0}")]
    Hook(#[source] BoxError),
}

impl Error {
    /// Failure raised by a hook's own logic, e.g. a token refresh inside `before_request`.
    ///
    /// Retried like a transport failure when the method allows it.
    pub fn hook(source: impl Into<BoxError>) -> Self {
        Error::Hook(source.into())
    }

    /// Returns `true` for errors raised while validating options, before any I/O.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidOptions(_)
                | Error::InvalidUrl { .. }
                | Error::InvalidInput(_)
                | Error::TimeoutOutOfRange { .. }
                | Error::Unsupported(_)
                | Error::MissingTransport
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// The response status, for HTTP failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http(error) => Some(error.response.status()),
            _ => None,
        }
    }

    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(error) => Some(error),
            _ => None,
        }
    }
}

impl From<HttpError> for Error {
    fn from(error: HttpError) -> Self {
        Error::Http(Box::new(error))
    }
}

impl From<TimeoutError> for Error {
    fn from(error: TimeoutError) -> Self {
        Error::Timeout(Box::new(error))
    }
}

/// The call exceeded its deadline.
#[derive(Debug, Error)]
#[error("Request timed out: {} {}", .request.method(), .request.url())]
pub struct TimeoutError {
    pub request: Request,
}

impl TimeoutError {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

/// The transport succeeded but the response status indicates failure.
///
/// `before_error` hooks receive and return this value, so every field is public
/// and may be rewritten before the error reaches the caller.
pub struct HttpError {
    pub response: Response,
    pub request: Request,
    pub config: Arc<Config>,
    pub message: String,
}

impl HttpError {
    pub fn new(response: Response, request: Request, config: Arc<Config>) -> Self {
        let status = match response.status_text() {
            Some(text) => format!("{} {}", response.status().as_u16(), text),
            None => response.status().as_u16().to_string(),
        };
        let message = format!(
            "Request failed with status code {}: {} {}",
            status,
            request.method(),
            request.url()
        );
        Self {
            response,
            request,
            config,
            message,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("message", &self.message)
            .field("response", &self.response)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_classified() {
        assert!(Error::InvalidOptions("x".into()).is_config());
        assert!(Error::MissingTransport.is_config());
        assert!(!Error::Aborted.is_config());
        assert!(!Error::Transport("offline".into()).is_config());
    }

    #[test]
    fn timeout_message_names_request() {
        let request = Request::new(http::Method::GET, "https://example.com/a".parse().unwrap());
        let error = Error::from(TimeoutError::new(request));
        assert!(error.is_timeout());
        assert_eq!(error.to_string(), "Request timed out: GET https://example.com/a");
    }
}
