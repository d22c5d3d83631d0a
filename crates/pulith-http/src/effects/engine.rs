//! The per-call execution loop.
//!
//! One [`Execution`] owns all state of a call: the retained request, the retry
//! counter and whether the body can still be replayed. Attempts run in a loop
//! driven by [`RetryDecision`]; there is no recursion.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::core::RetryDecision;
use crate::data::{Config, Request, RequestAction, Response, RetryAction, RetryContext, Timeout};
use crate::effects::progress::stream_response;
use crate::error::{Error, HttpError, Result, TimeoutError};

/// Execute a built request under `config`.
///
/// Resolves with `None` only when a `before_retry` hook stops the call.
pub async fn run(request: Request, config: Arc<Config>) -> Result<Option<Response>> {
    let mut execution = Execution::new(request, config);
    let result = execution.drive().await;
    execution.release_body();
    result
}

struct Execution {
    config: Arc<Config>,
    /// Kept back for retries. Each send gets a clone.
    request: Request,
    /// The effective cancellation handle of the call.
    signal: CancellationToken,
    retry_count: u32,
    replayable: bool,
}

impl Execution {
    fn new(request: Request, config: Arc<Config>) -> Self {
        let signal = request.signal().clone();
        Self {
            config,
            request,
            signal,
            retry_count: 0,
            replayable: true,
        }
    }

    async fn drive(&mut self) -> Result<Option<Response>> {
        let retry_enabled = self.config.retry.allows_method(self.request.method());

        loop {
            let error = match self.attempt().await {
                Ok(response) => return Ok(Some(response)),
                Err(error) => error,
            };
            if !retry_enabled {
                return Err(error);
            }

            self.retry_count += 1;
            let delay = match self
                .config
                .retry
                .decide(&error, self.retry_count, SystemTime::now())
            {
                RetryDecision::Retry(delay) => delay,
                RetryDecision::Fail => {
                    debug!(retry_count = self.retry_count, error = %error, "not retrying");
                    return Err(error);
                }
            };
            if !self.replayable {
                warn!(
                    url = %self.request.url(),
                    "request body was a one-shot stream and cannot be resent; not retrying"
                );
                return Err(error);
            }

            debug!(
                retry_count = self.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying request"
            );

            for hook in self.config.hooks.before_retry_hooks() {
                trace!(retry_count = self.retry_count, "running before_retry hook");
                let context = RetryContext {
                    request: &self.request,
                    config: &self.config,
                    error: &error,
                    retry_count: self.retry_count,
                };
                if hook(context).await? == RetryAction::Stop {
                    debug!(retry_count = self.retry_count, "retry stopped by hook");
                    return Ok(None);
                }
            }

            self.wait(delay).await?;
        }
    }

    async fn attempt(&mut self) -> Result<Response> {
        if self.signal.is_cancelled() {
            return Err(Error::Aborted);
        }
        debug!(
            method = %self.request.method(),
            url = %self.request.url(),
            attempt = self.retry_count + 1,
            "sending request"
        );

        let mut synthetic = None;
        for hook in self.config.hooks.before_request_hooks() {
            trace!("running before_request hook");
            match hook(&self.request, self.config.as_ref()).await? {
                RequestAction::Proceed => {}
                RequestAction::Replace(request) => {
                    let mut previous = std::mem::replace(&mut self.request, request);
                    if let Some(body) = previous.take_body() {
                        body.release();
                    }
                    self.replayable = true;
                }
                RequestAction::Respond(response) => {
                    synthetic = Some(response);
                    break;
                }
            }
        }

        let mut response = match synthetic {
            Some(response) => response,
            None => self.dispatch().await?,
        };

        for hook in self.config.hooks.after_response_hooks() {
            trace!(status = %response.status(), "running after_response hook");
            let (current, copy) = response.duplicate().await?;
            response = match hook(&self.request, self.config.as_ref(), copy).await? {
                Some(replacement) => replacement,
                None => current,
            };
        }

        if let Some(parse_json) = &self.config.parse_json {
            response = response.with_json_parser(Arc::clone(parse_json));
        }

        if !response.ok() && self.config.throw_on_error {
            let mut error =
                HttpError::new(response, self.request.clone_head(), Arc::clone(&self.config));
            for hook in self.config.hooks.before_error_hooks() {
                trace!(status = %error.status(), "running before_error hook");
                error = hook(error).await;
            }
            return Err(error.into());
        }

        if let Some(on_progress) = &self.config.on_download_progress {
            response = stream_response(response, Arc::clone(on_progress));
        }
        Ok(response)
    }

    /// Send a copy of the retained request, racing the timeout and cancellation.
    async fn dispatch(&mut self) -> Result<Response> {
        let outgoing = match self.request.try_clone() {
            Some(outgoing) => outgoing,
            None => {
                self.replayable = false;
                let mut outgoing = self.request.clone_head();
                outgoing.set_body(self.request.take_body());
                outgoing
            }
        };

        let signal = outgoing.signal().clone();
        let send = self.config.transport.send(outgoing);

        let result = match self.config.timeout {
            Timeout::Disabled => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(Error::Aborted),
                result = send => result,
            },
            Timeout::After(timeout) => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(Error::Aborted),
                result = send => result,
                _ = tokio::time::sleep(timeout) => {
                    debug!(
                        timeout_ms = timeout.as_millis() as u64,
                        url = %self.request.url(),
                        "request timed out"
                    );
                    signal.cancel();
                    return Err(TimeoutError::new(self.request.clone_head()).into());
                }
            },
        };

        result.map_err(Error::Transport)
    }

    async fn wait(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.signal.cancelled() => Err(Error::Aborted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn release_body(&mut self) {
        if let Some(body) = self.request.take_body() {
            body.release();
        }
    }
}
