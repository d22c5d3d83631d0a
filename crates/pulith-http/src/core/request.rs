use http::Method;
use http::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::merge_values;
use crate::data::{Body, Config, Duplex, Request};
use crate::error::{Error, Result};

/// What a call is aimed at.
#[derive(Debug)]
pub enum Target {
    /// Absolute URL, or a path relative to `prefix_url`.
    Text(String),
    Url(Url),
    /// An existing request whose method, headers, body and signal form the base layer.
    Request(Request),
}

impl From<&str> for Target {
    fn from(text: &str) -> Self {
        Target::Text(text.to_string())
    }
}

impl From<String> for Target {
    fn from(text: String) -> Self {
        Target::Text(text)
    }
}

impl From<&String> for Target {
    fn from(text: &String) -> Self {
        Target::Text(text.clone())
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Target::Url(url)
    }
}

impl From<Request> for Target {
    fn from(request: Request) -> Self {
        Target::Request(request)
    }
}

/// Upper-case the standard lowercase verbs. Anything else passes through unchanged.
pub fn normalize_method(method: &str) -> String {
    match method {
        "get" | "post" | "put" | "patch" | "head" | "delete" => method.to_ascii_uppercase(),
        _ => method.to_string(),
    }
}

/// Resolve a string target against an optional prefix.
///
/// The prefix is forced to end with `/` and concatenated with `input`, which
/// must then not start with `/`.
pub fn resolve_url(input: &str, prefix: Option<&str>) -> Result<Url> {
    let joined = match prefix.filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => {
            if input.starts_with('/') {
                return Err(Error::InvalidInput(
                    "`input` must not begin with a slash when using `prefix_url`".to_string(),
                ));
            }
            if prefix.ends_with('/') {
                format!("{prefix}{input}")
            } else {
                format!("{prefix}/{input}")
            }
        }
        None => input.to_string(),
    };

    Url::parse(&joined).map_err(|e| Error::InvalidUrl {
        input: joined,
        reason: e.to_string(),
    })
}

/// Build the request for one call from its target and normalized config.
///
/// `body` is the body taken out of the merged options, if any.
pub fn build(target: Target, config: &Config, body: Option<Body>) -> Result<Request> {
    let (url, mut base) = match target {
        Target::Text(text) => (resolve_url(&text, config.prefix_url.as_deref())?, None),
        Target::Url(url) => (url, None),
        Target::Request(request) => (request.url().clone(), Some(request)),
    };

    let method = config
        .method
        .clone()
        .or_else(|| base.as_ref().map(|request| request.method().clone()))
        .unwrap_or(Method::GET);
    let mut request = Request::new(method, url);

    let caller_signal = config.signal.clone();
    let mut body = body;
    if let Some(base) = base.as_mut() {
        *request.headers_mut() = base.headers().clone();
        *request.extra_mut() = base.extra().clone();
        if body.is_none() {
            body = base.take_body();
        }
    }
    let caller_signal = caller_signal.or_else(|| base.as_ref().map(|r| r.signal().clone()));
    request.set_signal(
        caller_signal
            .map(|signal| signal.child_token())
            .unwrap_or_else(CancellationToken::new),
    );

    let headers = request.headers_mut();
    for name in &config.removed_headers {
        headers.remove(name);
    }
    for name in config.headers.keys() {
        headers.remove(name);
    }
    for (name, value) in &config.headers {
        headers.append(name.clone(), value.clone());
    }

    let streams = config.transport.supports_request_streams();
    if streams {
        request.set_duplex(Some(Duplex::Half));
    }

    if let Some(json) = &config.json {
        let text = match &config.stringify_json {
            Some(stringify) => stringify(json)
                .map_err(|e| Error::InvalidInput(format!("failed to serialize `json`: {e}")))?,
            None => serde_json::to_string(json).map_err(|e| Error::InvalidInput(e.to_string()))?,
        };
        body = Some(Body::from_bytes(text));
        request
            .headers_mut()
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
    }

    if let Some(params) = &config.search_params {
        let query = params.to_query();
        request
            .url_mut()
            .set_query((!query.is_empty()).then_some(query.as_str()));

        let is_form = body.as_ref().is_some_and(Body::is_form);
        if is_form && !config.headers.contains_key(CONTENT_TYPE) {
            request.headers_mut().remove(CONTENT_TYPE);
        }
    }

    if let Some(content_type) = body.as_ref().and_then(Body::content_type) {
        if !request.headers().contains_key(CONTENT_TYPE) {
            let value = HeaderValue::from_str(&content_type)
                .map_err(|e| Error::InvalidInput(e.to_string()))?;
            request.headers_mut().insert(CONTENT_TYPE, value);
        }
    }

    if let Some(on_progress) = &config.on_upload_progress {
        if !streams {
            return Err(Error::Unsupported(
                "upload progress requires a transport that streams request bodies",
            ));
        }
        body = body.map(|body| body.with_upload_progress(on_progress.clone()));
    }
    request.set_body(body);

    if !config.extra.is_empty() {
        let base = Value::Object(std::mem::take(request.extra_mut()));
        if let Value::Object(extra) = merge_values(base, Value::Object(config.extra.clone())) {
            *request.extra_mut() = extra;
        }
    }

    Ok(request)
}
