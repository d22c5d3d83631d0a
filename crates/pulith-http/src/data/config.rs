use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use http::header::{HeaderMap, HeaderName};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::{RetryPolicy, normalize_method};
use crate::data::body::Body;
use crate::data::hooks::Hooks;
use crate::data::options::{JsonParser, JsonStringifier, Options, SearchParams, Timeout};
use crate::data::progress::ProgressCallback;
use crate::effects::Transport;
use crate::error::{Error, Result};

/// Default per-attempt deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest delay a timer accepts, in milliseconds.
pub const MAX_SAFE_TIMEOUT_MS: u64 = i32::MAX as u64;

/// Normalized options of one call, shared immutably by the engine and hooks.
pub struct Config {
    /// Explicit method, if any layer set one.
    pub method: Option<Method>,
    /// Headers set by the option layers.
    pub headers: HeaderMap,
    /// Headers deleted by the option layers. Applied to a [`Request`](crate::Request) target.
    pub removed_headers: Vec<HeaderName>,
    pub json: Option<Value>,
    pub search_params: Option<SearchParams>,
    pub prefix_url: Option<String>,
    pub retry: RetryPolicy,
    pub timeout: Timeout,
    pub hooks: Hooks,
    pub throw_on_error: bool,
    pub on_download_progress: Option<ProgressCallback>,
    pub on_upload_progress: Option<ProgressCallback>,
    pub transport: Arc<dyn Transport>,
    pub parse_json: Option<JsonParser>,
    pub stringify_json: Option<JsonStringifier>,
    pub signal: Option<CancellationToken>,
    pub extra: Map<String, Value>,
}

impl Config {
    /// Validate merged options and fill in defaults.
    ///
    /// The body is returned separately because it is moved into the request
    /// rather than shared.
    pub fn normalize(options: Options) -> Result<(Config, Option<Body>)> {
        if !options.invalid_headers.is_empty() {
            return Err(Error::InvalidOptions(options.invalid_headers.join("; ")));
        }

        let method = options
            .method
            .as_deref()
            .map(|method| {
                Method::from_bytes(normalize_method(method).as_bytes())
                    .map_err(|_| Error::InvalidOptions(format!("invalid method '{method}'")))
            })
            .transpose()?;

        let mut headers = HeaderMap::new();
        let mut removed_headers = Vec::new();
        for (name, value) in options.headers {
            let Some(name) = name else { continue };
            match value {
                Some(value) => {
                    headers.insert(name, value);
                }
                None => removed_headers.push(name),
            }
        }

        let timeout = match options.timeout.unwrap_or(Timeout::After(DEFAULT_TIMEOUT)) {
            Timeout::After(duration) if duration.as_millis() > u128::from(MAX_SAFE_TIMEOUT_MS) => {
                return Err(Error::TimeoutOutOfRange {
                    requested: duration.as_millis(),
                    max: MAX_SAFE_TIMEOUT_MS,
                });
            }
            timeout => timeout,
        };

        let transport = match options.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };

        let config = Config {
            method,
            headers,
            removed_headers,
            json: options.json,
            search_params: options.search_params,
            prefix_url: options.prefix_url,
            retry: RetryPolicy::from_options(options.retry.unwrap_or_default()),
            timeout,
            hooks: options.hooks,
            throw_on_error: options.throw_on_error.unwrap_or(true),
            on_download_progress: options.on_download_progress,
            on_upload_progress: options.on_upload_progress,
            transport,
            parse_json: options.parse_json,
            stringify_json: options.stringify_json,
            signal: options.signal,
            extra: options.extra,
        };
        Ok((config, options.body))
    }
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    use once_cell::sync::Lazy;

    static DEFAULT: Lazy<Arc<dyn Transport>> =
        Lazy::new(|| Arc::new(crate::effects::ReqwestTransport::new()));
    Ok(Arc::clone(&DEFAULT))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(Error::MissingTransport)
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("removed_headers", &self.removed_headers)
            .field("search_params", &self.search_params)
            .field("prefix_url", &self.prefix_url)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("hooks", &self.hooks)
            .field("throw_on_error", &self.throw_on_error)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::from_fn;
    use crate::data::Response;
    use http::StatusCode;

    fn options() -> Options {
        Options::new().transport(from_fn(|_request| async {
            Ok(Response::new(StatusCode::OK))
        }))
    }

    #[test]
    fn test_defaults() {
        let (config, body) = Config::normalize(options()).unwrap();
        assert!(body.is_none());
        assert_eq!(config.method, None);
        assert_eq!(config.timeout, Timeout::After(DEFAULT_TIMEOUT));
        assert!(config.throw_on_error);
        assert_eq!(config.retry.limit, 2);
    }

    #[test]
    fn test_method_is_normalized() {
        let (config, _) = Config::normalize(options().method("patch")).unwrap();
        assert_eq!(config.method, Some(Method::PATCH));

        let (config, _) = Config::normalize(options().method("Propfind")).unwrap();
        assert_eq!(config.method.as_ref().map(Method::as_str), Some("Propfind"));
    }

    #[test]
    fn test_timeout_out_of_range() {
        let too_long = Duration::from_millis(MAX_SAFE_TIMEOUT_MS + 1);
        let error = Config::normalize(options().timeout(too_long)).unwrap_err();
        assert!(matches!(error, Error::TimeoutOutOfRange { .. }));

        let max = Duration::from_millis(MAX_SAFE_TIMEOUT_MS);
        assert!(Config::normalize(options().timeout(max)).is_ok());
    }

    #[test]
    fn test_delete_markers_are_split_out() {
        let (config, _) =
            Config::normalize(options().header("x-a", "1").remove_header("x-b")).unwrap();
        assert_eq!(config.headers.get("x-a").unwrap(), "1");
        assert_eq!(config.removed_headers, vec![HeaderName::from_static("x-b")]);
    }

    #[test]
    fn test_invalid_header_fails() {
        let error = Config::normalize(options().header("x-a", "line\nbreak")).unwrap_err();
        assert!(matches!(error, Error::InvalidOptions(_)));
    }
}
