//! Data types shared by every layer of the crate.
//!
//! Option layers are plain values: merging consumes or clones them and never
//! mutates an earlier layer. [`Config`] is the normalized, immutable result that
//! the engine shares through an `Arc`.

pub mod body;
pub mod config;
pub mod form;
pub mod hooks;
pub mod options;
pub mod progress;
pub mod request;
pub mod response;

pub use body::{Body, BodyStream};
pub use config::Config;
pub use form::{FormData, FormValue};
pub use hooks::{
    AfterResponseHook, BeforeErrorHook, BeforeRequestHook, BeforeRetryHook, Hooks, RequestAction,
    RetryAction, RetryContext,
};
pub use options::{
    BackoffFn, HeaderPatch, JsonParser, JsonStringifier, Options, RetryOptions, SearchParams,
    Timeout,
};
pub use progress::{Progress, ProgressCallback};
pub use request::{Duplex, Request};
pub use response::Response;
