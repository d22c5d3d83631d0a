use std::future::Future;

use async_trait::async_trait;

use crate::data::{Request, Response};
use crate::error::BoxError;

/// Performs one physical request/response exchange.
///
/// Implementations own connection handling, TLS and redirects. The engine
/// drops the returned future when the call times out or is cancelled.
///
/// # Implementations
///
/// - [`ReqwestTransport`]: production transport using `reqwest`
/// - [`FnTransport`]: wraps an async closure, handy for tests and adapters
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, BoxError>;

    /// Whether request bodies can be sent as incremental streams.
    ///
    /// Upload progress is only available when this returns `true`.
    fn supports_request_streams(&self) -> bool {
        true
    }
}

/// A [`Transport`] backed by an async closure.
pub struct FnTransport<F> {
    send: F,
    request_streams: bool,
}

/// Build a transport from `Fn(Request) -> impl Future<Output = Result<Response, BoxError>>`.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use pulith_http::{Options, Response, from_fn};
///
/// let options = Options::default().transport(from_fn(|request| async move {
///     let status = if request.url().path() == "/health" {
///         StatusCode::OK
///     } else {
///         StatusCode::NOT_FOUND
///     };
///     Ok(Response::new(status))
/// }));
/// ```
pub fn from_fn<F, Fut>(send: F) -> FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, BoxError>> + Send,
{
    FnTransport {
        send,
        request_streams: true,
    }
}

impl<F> FnTransport<F> {
    /// Report that request bodies cannot be streamed.
    #[must_use]
    pub fn without_request_streams(mut self) -> Self {
        self.request_streams = false;
        self
    }
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, BoxError>> + Send,
{
    async fn send(&self, request: Request) -> Result<Response, BoxError> {
        (self.send)(request).await
    }

    fn supports_request_streams(&self) -> bool {
        self.request_streams
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use super::*;
    use http::HeaderMap;
    use http::header::CONTENT_LENGTH;

    use crate::data::{Body, BodyStream};

    /// Length to announce for a streamed body, unless the caller set one.
    pub(super) fn declared_length(headers: &HeaderMap, body: &Body) -> Option<u64> {
        if headers.contains_key(CONTENT_LENGTH) {
            return None;
        }
        body.content_length()
    }

    /// Production transport using `reqwest`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Use a preconfigured client, e.g. with custom TLS or proxy settings.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, mut request: Request) -> Result<Response, BoxError> {
            let mut builder = self
                .client
                .request(request.method().clone(), request.url().clone())
                .headers(request.headers().clone());

            if let Some(body) = request.take_body() {
                builder = match body.to_bytes() {
                    Some(bytes) => builder.body(bytes),
                    None => {
                        if let Some(length) = declared_length(request.headers(), &body) {
                            builder = builder.header(CONTENT_LENGTH, length);
                        }
                        builder.body(reqwest::Body::wrap_stream(BodyStream::new(body.into_stream())))
                    }
                };
            }

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let url = response.url().clone();

            Ok(Response::new(status)
                .with_headers(headers)
                .with_url(url)
                .with_body(Body::from_stream(response.bytes_stream())))
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestTransport;
