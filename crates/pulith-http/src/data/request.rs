use std::fmt;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::data::body::Body;

/// Request body transmission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    /// The body is streamed after the headers, without waiting for a response.
    Half,
}

/// A fully resolved request, ready for a [`Transport`](crate::Transport).
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
    signal: CancellationToken,
    duplex: Option<Duplex>,
    extra: Map<String, Value>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            signal: CancellationToken::new(),
            duplex: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn set_body(&mut self, body: Option<Body>) {
        self.body = body;
    }

    /// Cancellation handle observed by the transport.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub(crate) fn set_signal(&mut self, signal: CancellationToken) {
        self.signal = signal;
    }

    pub fn duplex(&self) -> Option<Duplex> {
        self.duplex
    }

    pub(crate) fn set_duplex(&mut self, duplex: Option<Duplex>) {
        self.duplex = duplex;
    }

    /// Pass-through fields forwarded verbatim to the transport.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.extra
    }

    /// Clone the request including its body. `None` when the body is a one-shot stream.
    pub fn try_clone(&self) -> Option<Request> {
        let body = match &self.body {
            Some(body) => Some(body.try_clone()?),
            None => None,
        };
        let mut copy = self.clone_head();
        copy.body = body;
        Some(copy)
    }

    /// Clone everything except the body.
    pub fn clone_head(&self) -> Request {
        Request {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: None,
            signal: self.signal.clone(),
            duplex: self.duplex,
            extra: self.extra.clone(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("duplex", &self.duplex)
            .field("cancelled", &self.signal.is_cancelled())
            .finish_non_exhaustive()
    }
}
