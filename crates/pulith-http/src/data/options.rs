use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::data::body::Body;
use crate::data::config::Config;
use crate::data::hooks::{Hooks, RequestAction, RetryAction, RetryContext};
use crate::data::progress::{Progress, ProgressCallback};
use crate::data::request::Request;
use crate::data::response::Response;
use crate::effects::Transport;
use crate::error::{BoxError, Error, HttpError, Result};

/// Header changes carried by one option layer. `None` deletes the header.
pub type HeaderPatch = HeaderMap<Option<HeaderValue>>;

/// Decodes response text into JSON.
pub type JsonParser = Arc<dyn Fn(&str) -> std::result::Result<Value, BoxError> + Send + Sync>;

/// Encodes the `json` option into the request body.
pub type JsonStringifier =
    Arc<dyn Fn(&Value) -> std::result::Result<String, BoxError> + Send + Sync>;

/// Maps a retry count (starting at 1) to a backoff delay.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Per-attempt deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Disabled,
    After(Duration),
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

/// Query string applied to the request URL, replacing any existing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchParams {
    /// Raw query text. A leading `?` is ignored.
    Text(String),
    /// Key/value pairs, form-urlencoded in order.
    Pairs(Vec<(String, String)>),
}

impl SearchParams {
    pub fn to_query(&self) -> String {
        match self {
            SearchParams::Text(text) => text.strip_prefix('?').unwrap_or(text).to_string(),
            SearchParams::Pairs(pairs) => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish(),
        }
    }
}

impl From<&str> for SearchParams {
    fn from(text: &str) -> Self {
        SearchParams::Text(text.to_string())
    }
}

impl From<String> for SearchParams {
    fn from(text: String) -> Self {
        SearchParams::Text(text)
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for SearchParams {
    fn from(pairs: Vec<(K, V)>) -> Self {
        SearchParams::Pairs(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for SearchParams {
    fn from(pairs: [(K, V); N]) -> Self {
        SearchParams::Pairs(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Retry settings of one option layer. Unset fields fall back to the defaults
/// of [`RetryPolicy`](crate::RetryPolicy).
///
/// Lists concatenate when layers merge, scalars are replaced by later layers.
#[derive(Clone, Default)]
pub struct RetryOptions {
    pub limit: Option<u32>,
    pub methods: Option<Vec<String>>,
    pub status_codes: Option<Vec<u16>>,
    pub after_status_codes: Option<Vec<u16>>,
    /// Upper bound for server-directed delays.
    pub max_retry_after: Option<Duration>,
    /// Upper bound for computed backoff delays.
    pub backoff_limit: Option<Duration>,
    pub delay: Option<BackoffFn>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = Some(codes.into_iter().collect());
        self
    }

    #[must_use]
    pub fn after_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.after_status_codes = Some(codes.into_iter().collect());
        self
    }

    #[must_use]
    pub fn max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = Some(max);
        self
    }

    #[must_use]
    pub fn backoff_limit(mut self, limit: Duration) -> Self {
        self.backoff_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Arc::new(delay));
        self
    }
}

impl From<u32> for RetryOptions {
    fn from(limit: u32) -> Self {
        RetryOptions::new().limit(limit)
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("limit", &self.limit)
            .field("methods", &self.methods)
            .field("status_codes", &self.status_codes)
            .field("after_status_codes", &self.after_status_codes)
            .field("max_retry_after", &self.max_retry_after)
            .field("backoff_limit", &self.backoff_limit)
            .field("delay", &self.delay.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

/// One layer of request options.
///
/// Layers are combined with [`merge`](crate::merge) and normalized into a
/// [`Config`]. Every field is optional; unset fields leave earlier layers alone.
///
/// # Examples
///
/// ```
/// use pulith_http::data::Options;
/// use std::time::Duration;
///
/// let options = Options::default()
///     .prefix_url("https://api.example.com")
///     .header("authorization", "Bearer token")
///     .timeout(Duration::from_secs(30))
///     .retry(5);
/// ```
#[derive(Default)]
pub struct Options {
    /// Request method. Lowercase standard verbs are upper-cased.
    pub method: Option<String>,

    pub headers: HeaderPatch,

    pub body: Option<Body>,

    /// Serialized into the body with `content-type: application/json`.
    pub json: Option<Value>,

    pub search_params: Option<SearchParams>,

    /// Base joined with relative string targets.
    pub prefix_url: Option<String>,

    pub retry: Option<RetryOptions>,

    /// Default: 10 seconds.
    pub timeout: Option<Timeout>,

    pub hooks: Hooks,

    /// Fail non-2xx responses with [`Error::Http`]. Default: `true`.
    pub throw_on_error: Option<bool>,

    pub on_download_progress: Option<ProgressCallback>,

    pub on_upload_progress: Option<ProgressCallback>,

    pub transport: Option<Arc<dyn Transport>>,

    pub parse_json: Option<JsonParser>,

    pub stringify_json: Option<JsonStringifier>,

    /// Caller cancellation. Cancelling it aborts the call.
    pub signal: Option<CancellationToken>,

    /// Pass-through fields forwarded verbatim to the transport.
    pub extra: Map<String, Value>,

    pub(crate) invalid_headers: Vec<String>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a layer from a declarative JSON document.
    ///
    /// Recognized keys are `method`, `headers` (a `null` value deletes),
    /// `json`, `searchParams`, `prefixUrl`, `retry` (a limit or an object),
    /// `timeout` (milliseconds or `false`) and `throwOnError`. Other keys are
    /// kept as pass-through fields. `null` yields an empty layer.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulith_http::data::Options;
    /// use serde_json::json;
    ///
    /// let options = Options::from_json(&json!({
    ///     "prefixUrl": "https://api.example.com",
    ///     "retry": { "limit": 4, "statusCodes": [503] },
    ///     "timeout": false,
    /// }))
    /// .unwrap();
    /// assert_eq!(options.retry.unwrap().limit, Some(4));
    /// ```
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(_) => {}
            _ => {
                return Err(Error::InvalidOptions(
                    "The `options` argument must be an object".to_string(),
                ));
            }
        }

        let document: OptionsDocument = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidOptions(e.to_string()))?;
        document.into_options()
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set a header. Invalid names or values fail when the options are normalized.
    #[must_use]
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        match HeaderName::try_from(name) {
            Ok(name) => match HeaderValue::try_from(value) {
                Ok(value) => {
                    self.headers.insert(name, Some(value));
                }
                Err(e) => self
                    .invalid_headers
                    .push(format!("invalid value for header '{name}': {}", http_error(e))),
            },
            Err(e) => self
                .invalid_headers
                .push(format!("invalid header name: {}", http_error(e))),
        }
        self
    }

    /// Remove a header set by an earlier layer.
    #[must_use]
    pub fn remove_header<K>(mut self, name: K) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    {
        match HeaderName::try_from(name) {
            Ok(name) => {
                self.headers.insert(name, None);
            }
            Err(e) => self
                .invalid_headers
                .push(format!("invalid header name: {}", http_error(e))),
        }
        self
    }

    /// Set every header in `headers`, replacing same-named entries of this layer.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut last = None;
        for (name, value) in headers {
            if let Some(name) = name {
                last = Some(name);
            }
            if let Some(name) = &last {
                self.headers.insert(name.clone(), Some(value));
            }
        }
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn json(mut self, json: impl Into<Value>) -> Self {
        self.json = Some(json.into());
        self
    }

    #[must_use]
    pub fn search_params(mut self, params: impl Into<SearchParams>) -> Self {
        self.search_params = Some(params.into());
        self
    }

    #[must_use]
    pub fn prefix_url(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_url = Some(prefix.into());
        self
    }

    /// Set retry options. A bare number sets only the limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulith_http::data::{Options, RetryOptions};
    /// use std::time::Duration;
    ///
    /// let simple = Options::default().retry(5);
    /// let detailed = Options::default().retry(
    ///     RetryOptions::new()
    ///         .limit(3)
    ///         .status_codes([503])
    ///         .backoff_limit(Duration::from_secs(2)),
    /// );
    /// ```
    #[must_use]
    pub fn retry(mut self, retry: impl Into<RetryOptions>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Wait for the transport indefinitely.
    #[must_use]
    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(Timeout::Disabled);
        self
    }

    /// Replace the hooks of this layer.
    #[must_use]
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn before_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Config) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestAction>> + Send + 'static,
    {
        self.hooks = self.hooks.before_request(hook);
        self
    }

    #[must_use]
    pub fn before_retry<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RetryContext<'_>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RetryAction>> + Send + 'static,
    {
        self.hooks = self.hooks.before_retry(hook);
        self
    }

    #[must_use]
    pub fn after_response<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Config, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Response>>> + Send + 'static,
    {
        self.hooks = self.hooks.after_response(hook);
        self
    }

    #[must_use]
    pub fn before_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HttpError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpError> + Send + 'static,
    {
        self.hooks = self.hooks.before_error(hook);
        self
    }

    #[must_use]
    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = Some(throw);
        self
    }

    #[must_use]
    pub fn on_download_progress(
        mut self,
        callback: impl Fn(Progress, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.on_download_progress = Some(Arc::new(callback));
        self
    }

    /// Report upload progress. Requires a transport that streams request bodies.
    #[must_use]
    pub fn on_upload_progress(
        mut self,
        callback: impl Fn(Progress, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.on_upload_progress = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn parse_json(
        mut self,
        parse: impl Fn(&str) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.parse_json = Some(Arc::new(parse));
        self
    }

    #[must_use]
    pub fn stringify_json(
        mut self,
        stringify: impl Fn(&Value) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.stringify_json = Some(Arc::new(stringify));
        self
    }

    #[must_use]
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Add a pass-through field forwarded to the transport.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl Clone for Options {
    /// Clones every field. A stream body cannot be cloned and is left out of the copy.
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.as_ref().and_then(|body| {
                let copy = body.try_clone();
                if copy.is_none() {
                    warn!("options carry a one-shot stream body; the copy is sent without a body");
                }
                copy
            }),
            json: self.json.clone(),
            search_params: self.search_params.clone(),
            prefix_url: self.prefix_url.clone(),
            retry: self.retry.clone(),
            timeout: self.timeout,
            hooks: self.hooks.clone(),
            throw_on_error: self.throw_on_error,
            on_download_progress: self.on_download_progress.clone(),
            on_upload_progress: self.on_upload_progress.clone(),
            transport: self.transport.clone(),
            parse_json: self.parse_json.clone(),
            stringify_json: self.stringify_json.clone(),
            signal: self.signal.clone(),
            extra: self.extra.clone(),
            invalid_headers: self.invalid_headers.clone(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("json", &self.json)
            .field("search_params", &self.search_params)
            .field("prefix_url", &self.prefix_url)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("hooks", &self.hooks)
            .field("throw_on_error", &self.throw_on_error)
            .field("on_download_progress", &self.on_download_progress.as_ref().map(|_| "{ ... }"))
            .field("on_upload_progress", &self.on_upload_progress.as_ref().map(|_| "{ ... }"))
            .field("transport", &self.transport.as_ref().map(|_| "{ ... }"))
            .field("signal", &self.signal)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

fn http_error(error: impl Into<http::Error>) -> http::Error {
    error.into()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsDocument {
    method: Option<String>,
    headers: Option<BTreeMap<String, Option<String>>>,
    json: Option<Value>,
    search_params: Option<SearchParamsDocument>,
    prefix_url: Option<String>,
    retry: Option<RetryDocument>,
    timeout: Option<TimeoutDocument>,
    #[serde(alias = "throwHttpErrors")]
    throw_on_error: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchParamsDocument {
    Text(String),
    Pairs(Vec<(String, String)>),
    Object(BTreeMap<String, Value>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RetryDocument {
    Limit(u32),
    Detailed(RetryObjectDocument),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryObjectDocument {
    limit: Option<u32>,
    methods: Option<Vec<String>>,
    status_codes: Option<Vec<u16>>,
    after_status_codes: Option<Vec<u16>>,
    /// Milliseconds.
    max_retry_after: Option<u64>,
    /// Milliseconds.
    backoff_limit: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeoutDocument {
    Millis(u64),
    Enabled(bool),
}

impl OptionsDocument {
    fn into_options(self) -> Result<Options> {
        let mut options = Options {
            method: self.method,
            json: self.json,
            prefix_url: self.prefix_url,
            throw_on_error: self.throw_on_error,
            extra: self.extra,
            ..Options::default()
        };

        for (name, value) in self.headers.unwrap_or_default() {
            options = match value {
                Some(value) => options.header(name, value),
                None => options.remove_header(name),
            };
        }

        options.search_params = self.search_params.map(|params| match params {
            SearchParamsDocument::Text(text) => SearchParams::Text(text),
            SearchParamsDocument::Pairs(pairs) => SearchParams::Pairs(pairs),
            SearchParamsDocument::Object(map) => SearchParams::Pairs(
                map.into_iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(key, value)| match value {
                        Value::String(text) => (key, text),
                        other => (key, other.to_string()),
                    })
                    .collect(),
            ),
        });

        options.retry = self.retry.map(|retry| match retry {
            RetryDocument::Limit(limit) => RetryOptions::from(limit),
            RetryDocument::Detailed(retry) => RetryOptions {
                limit: retry.limit,
                methods: retry.methods,
                status_codes: retry.status_codes,
                after_status_codes: retry.after_status_codes,
                max_retry_after: retry.max_retry_after.map(Duration::from_millis),
                backoff_limit: retry.backoff_limit.map(Duration::from_millis),
                delay: None,
            },
        });

        options.timeout = match self.timeout {
            None => None,
            Some(TimeoutDocument::Millis(ms)) => Some(Timeout::After(Duration::from_millis(ms))),
            Some(TimeoutDocument::Enabled(false)) => Some(Timeout::Disabled),
            Some(TimeoutDocument::Enabled(true)) => {
                return Err(Error::InvalidOptions(
                    "`timeout` must be a number of milliseconds or false".to_string(),
                ));
            }
        };

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_null_is_empty_layer() {
        let options = Options::from_json(&Value::Null).unwrap();
        assert!(options.method.is_none());
        assert!(options.headers.is_empty());
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        for value in [json!([1, 2]), json!("options"), json!(3)] {
            let error = Options::from_json(&value).unwrap_err();
            assert!(matches!(error, Error::InvalidOptions(_)));
            assert!(error.is_config());
        }
    }

    #[test]
    fn test_from_json_reads_known_fields() {
        let options = Options::from_json(&json!({
            "method": "post",
            "headers": { "X-Token": "abc", "Accept": null },
            "searchParams": { "page": 2, "q": "rust" },
            "retry": 4,
            "timeout": 2500,
            "throwHttpErrors": false,
            "cache": "no-store"
        }))
        .unwrap();

        assert_eq!(options.method.as_deref(), Some("post"));
        assert_eq!(
            options.headers.get("x-token"),
            Some(&Some(HeaderValue::from_static("abc")))
        );
        assert_eq!(options.headers.get("accept"), Some(&None));
        assert_eq!(
            options.search_params,
            Some(SearchParams::Pairs(vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "rust".to_string()),
            ]))
        );
        assert_eq!(options.retry.and_then(|r| r.limit), Some(4));
        assert_eq!(options.timeout, Some(Timeout::After(Duration::from_millis(2500))));
        assert_eq!(options.throw_on_error, Some(false));
        assert_eq!(options.extra.get("cache"), Some(&json!("no-store")));
    }

    #[test]
    fn test_from_json_timeout_flag() {
        let disabled = Options::from_json(&json!({ "timeout": false })).unwrap();
        assert_eq!(disabled.timeout, Some(Timeout::Disabled));

        let error = Options::from_json(&json!({ "timeout": true })).unwrap_err();
        assert!(matches!(error, Error::InvalidOptions(_)));
    }

    #[test]
    fn test_invalid_header_is_recorded() {
        let options = Options::new().header("bad header", "x");
        assert!(options.headers.is_empty());
        assert_eq!(options.invalid_headers.len(), 1);
    }

    #[test]
    fn test_search_params_query() {
        assert_eq!(SearchParams::from("?a=1").to_query(), "a=1");
        assert_eq!(SearchParams::from([("q", "a b")]).to_query(), "q=a+b");
    }

    #[test]
    fn test_clone_drops_stream_body() {
        let chunks = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(bytes::Bytes::new())]);
        let options = Options::new().body(Body::from_stream(chunks)).retry(1);
        let copy = options.clone();
        assert!(copy.body.is_none());
        assert!(options.body.as_ref().is_some_and(Body::is_stream));
        assert_eq!(copy.retry.and_then(|r| r.limit), Some(1));
    }
}
