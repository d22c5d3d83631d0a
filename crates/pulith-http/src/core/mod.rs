//! Pure transformations: option merging, request building and retry decisions.
//!
//! Nothing in this module performs I/O or waits on time. The engine in
//! [`effects`](crate::effects) drives these functions.

mod merge;
mod request;
mod retry;

pub use merge::{merge, merge_headers, merge_hooks, merge_retry, merge_search_params, merge_values};
pub use request::{Target, build, normalize_method, resolve_url};
pub use retry::{
    DEFAULT_AFTER_STATUS_CODES, DEFAULT_METHODS, DEFAULT_STATUS_CODES, RetryDecision, RetryPolicy,
    default_backoff, retry_after,
};
