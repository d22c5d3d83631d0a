//! HTTP request execution on top of a pluggable transport.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Option layers, normalized configuration and message types
//! - [`core`] - Pure transformations: merging, request building, retry decisions
//! - [`effects`] - Transport abstraction, progress streams and the execution engine
//!
//! # Key Features
//!
//! - **Layered options**: library defaults, client defaults and per-call options deep-merge
//! - **Retries**: method/status aware, with exponential backoff and server-directed delays
//! - **Timeouts**: per attempt, cancelling the in-flight transport call
//! - **Hooks**: `before_request`, `before_retry`, `after_response`, `before_error`
//! - **Progress**: upload and download progress over streamed bodies
//!
//! # Example
//!
//! ```no_run
//! use pulith_http::{Client, Options};
//! use std::time::Duration;
//!
//! # async fn run() -> pulith_http::Result<()> {
//! let api = Client::new(
//!     Options::default()
//!         .prefix_url("https://api.example.com/v1")
//!         .timeout(Duration::from_secs(5))
//!         .retry(3),
//! );
//!
//! let users: Option<serde_json::Value> = api.get("users").json().await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use crate::core::{RetryDecision, RetryPolicy, Target, merge};
pub use data::{
    Body, BodyStream, Config, FormData, FormValue, Hooks, Options, Progress, ProgressCallback,
    Request, RequestAction, Response, RetryAction, RetryContext, RetryOptions, SearchParams,
    Timeout,
};
pub use effects::{Client, FnTransport, PendingRequest, Transport, from_fn};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestTransport;

pub use error::{BoxError, Error, HttpError, Result, TimeoutError};

/// Start a request with the default client.
pub fn request(target: impl Into<Target>) -> PendingRequest {
    Client::default().request(target)
}

/// Start a `GET` request with the default client.
pub fn get(target: impl Into<Target>) -> PendingRequest {
    Client::default().get(target)
}

/// Start a `POST` request with the default client.
pub fn post(target: impl Into<Target>) -> PendingRequest {
    Client::default().post(target)
}

/// Start a `PUT` request with the default client.
pub fn put(target: impl Into<Target>) -> PendingRequest {
    Client::default().put(target)
}

/// Start a `PATCH` request with the default client.
pub fn patch(target: impl Into<Target>) -> PendingRequest {
    Client::default().patch(target)
}

/// Start a `HEAD` request with the default client.
pub fn head(target: impl Into<Target>) -> PendingRequest {
    Client::default().head(target)
}

/// Start a `DELETE` request with the default client.
pub fn delete(target: impl Into<Target>) -> PendingRequest {
    Client::default().delete(target)
}
