//! Extension hooks run by the execution engine.
//!
//! Hooks in a category run in registration order and each observes the output
//! of the previous one. Hook futures are `'static`: clone whatever a hook needs
//! out of its borrowed arguments before the first `.await`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::data::config::Config;
use crate::data::request::Request;
use crate::data::response::Response;
use crate::error::{Error, HttpError, Result};

/// Outcome of a `before_request` hook.
#[derive(Debug)]
pub enum RequestAction {
    /// Keep the current request.
    Proceed,
    /// Use this request for the send and for later hooks.
    Replace(Request),
    /// Skip the transport and continue with this response.
    Respond(Response),
}

/// Outcome of a `before_retry` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Continue,
    /// Abandon the call. It resolves with no response.
    Stop,
}

/// What a `before_retry` hook sees.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    pub request: &'a Request,
    pub config: &'a Config,
    pub error: &'a Error,
    /// Retries performed so far, including the one about to happen.
    pub retry_count: u32,
}

pub type BeforeRequestHook =
    Arc<dyn Fn(&Request, &Config) -> BoxFuture<'static, Result<RequestAction>> + Send + Sync>;

pub type BeforeRetryHook =
    Arc<dyn Fn(RetryContext<'_>) -> BoxFuture<'static, Result<RetryAction>> + Send + Sync>;

/// Receives a copy of the response; `Some` replaces the current response.
pub type AfterResponseHook = Arc<
    dyn Fn(&Request, &Config, Response) -> BoxFuture<'static, Result<Option<Response>>>
        + Send
        + Sync,
>;

pub type BeforeErrorHook = Arc<dyn Fn(HttpError) -> BoxFuture<'static, HttpError> + Send + Sync>;

/// The four hook categories of one option layer.
///
/// `None` leaves a category to earlier layers when merging. An explicitly empty
/// category (see the `clear_*` methods) discards what earlier layers registered.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) before_request: Option<Vec<BeforeRequestHook>>,
    pub(crate) before_retry: Option<Vec<BeforeRetryHook>>,
    pub(crate) after_response: Option<Vec<AfterResponseHook>>,
    pub(crate) before_error: Option<Vec<BeforeErrorHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Config) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestAction>> + Send + 'static,
    {
        let hook: BeforeRequestHook =
            Arc::new(move |request: &Request, config: &Config| hook(request, config).boxed());
        self.before_request.get_or_insert_with(Vec::new).push(hook);
        self
    }

    #[must_use]
    pub fn before_retry<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RetryContext<'_>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RetryAction>> + Send + 'static,
    {
        let hook: BeforeRetryHook = Arc::new(move |context: RetryContext<'_>| hook(context).boxed());
        self.before_retry.get_or_insert_with(Vec::new).push(hook);
        self
    }

    #[must_use]
    pub fn after_response<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Config, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Response>>> + Send + 'static,
    {
        let hook: AfterResponseHook =
            Arc::new(move |request: &Request, config: &Config, response: Response| {
                hook(request, config, response).boxed()
            });
        self.after_response.get_or_insert_with(Vec::new).push(hook);
        self
    }

    #[must_use]
    pub fn before_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HttpError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpError> + Send + 'static,
    {
        let hook: BeforeErrorHook = Arc::new(move |error: HttpError| hook(error).boxed());
        self.before_error.get_or_insert_with(Vec::new).push(hook);
        self
    }

    #[must_use]
    pub fn clear_before_request(mut self) -> Self {
        self.before_request = Some(Vec::new());
        self
    }

    #[must_use]
    pub fn clear_before_retry(mut self) -> Self {
        self.before_retry = Some(Vec::new());
        self
    }

    #[must_use]
    pub fn clear_after_response(mut self) -> Self {
        self.after_response = Some(Vec::new());
        self
    }

    #[must_use]
    pub fn clear_before_error(mut self) -> Self {
        self.before_error = Some(Vec::new());
        self
    }

    pub fn before_request_hooks(&self) -> &[BeforeRequestHook] {
        self.before_request.as_deref().unwrap_or_default()
    }

    pub fn before_retry_hooks(&self) -> &[BeforeRetryHook] {
        self.before_retry.as_deref().unwrap_or_default()
    }

    pub fn after_response_hooks(&self) -> &[AfterResponseHook] {
        self.after_response.as_deref().unwrap_or_default()
    }

    pub fn before_error_hooks(&self) -> &[BeforeErrorHook] {
        self.before_error.as_deref().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.before_request_hooks().is_empty()
            && self.before_retry_hooks().is_empty()
            && self.after_response_hooks().is_empty()
            && self.before_error_hooks().is_empty()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_request", &self.before_request.as_ref().map(Vec::len))
            .field("before_retry", &self.before_retry.as_ref().map(Vec::len))
            .field("after_response", &self.after_response.as_ref().map(Vec::len))
            .field("before_error", &self.before_error.as_ref().map(Vec::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_is_kept() {
        let hooks = Hooks::new()
            .before_error(|error| async move { error })
            .before_error(|error| async move { error });
        assert_eq!(hooks.before_error_hooks().len(), 2);
        assert!(hooks.before_request_hooks().is_empty());
        assert!(!hooks.is_empty());
    }

    #[test]
    fn test_clear_marks_category_as_reset() {
        let hooks = Hooks::new().clear_before_retry();
        assert!(matches!(hooks.before_retry.as_deref(), Some([])));
        assert!(hooks.before_request.is_none());
        assert!(hooks.is_empty());
    }
}
