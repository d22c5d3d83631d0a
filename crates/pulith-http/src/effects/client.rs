use std::future::IntoFuture;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use http::header::{ACCEPT, HeaderValue};
use serde::de::DeserializeOwned;

use crate::core::{Target, build, merge};
use crate::data::{Config, FormData, Options, Response};
use crate::effects::engine::run;
use crate::error::Result;

/// Request entry point bound to a set of default options.
///
/// # Examples
///
/// ```no_run
/// use pulith_http::{Client, Options};
///
/// # async fn run() -> pulith_http::Result<()> {
/// let api = Client::new(Options::default().prefix_url("https://api.example.com"));
/// let authed = api.extend(Options::default().header("authorization", "Bearer token"));
///
/// let body = authed.post("items").options(Options::default().json(serde_json::json!({
///     "name": "pulith"
/// }))).text().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Client {
    defaults: Options,
}

impl Client {
    pub fn new(defaults: Options) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &Options {
        &self.defaults
    }

    pub fn request(&self, target: impl Into<Target>) -> PendingRequest {
        PendingRequest::new(self.defaults.clone(), None, target.into())
    }

    pub fn get(&self, target: impl Into<Target>) -> PendingRequest {
        PendingRequest::new(self.defaults.clone(), Some("GET"), target.into())
    }

    pub fn post(&self, target: impl Into<Target>) -> PendingRequest {
        PendingRequest::new(self.defaults.clone(), Some("POST"), target.into())
    }

    pub fn put(&self, target: impl Into<Target>) -> PendingRequest {
        PendingRequest::new(self.defaults.clone(), Some("PUT"), target.into())
    }

    pub fn patch(&self, target: impl Into<Target>) -> PendingRequest {
        PendingRequest::new(self.defaults.clone(), Some("PATCH"), target.into())
    }

    pub fn head(&self, target: impl Into<Target>) -> PendingRequest {
        PendingRequest::new(self.defaults.clone(), Some("HEAD"), target.into())
    }

    pub fn delete(&self, target: impl Into<Target>) -> PendingRequest {
        PendingRequest::new(self.defaults.clone(), Some("DELETE"), target.into())
    }

    /// A client whose defaults are these defaults merged with `options`.
    pub fn extend(&self, options: Options) -> Client {
        Client::new(merge([self.defaults.clone(), options]))
    }

    /// Like [`extend`](Self::extend), computing the new layer from the current defaults.
    pub fn extend_with(&self, f: impl FnOnce(&Options) -> Options) -> Client {
        let options = f(&self.defaults);
        self.extend(options)
    }

    /// A client with fresh defaults, ignoring this client's.
    pub fn create(&self, defaults: Options) -> Client {
        Client::new(defaults)
    }
}

/// A call that has not started yet.
///
/// Nothing is sent until the value is awaited or one of the decoding
/// accessors is called.
#[derive(Debug)]
#[must_use = "requests do nothing unless awaited"]
pub struct PendingRequest {
    defaults: Options,
    options: Option<Options>,
    verb: Option<&'static str>,
    target: Target,
}

impl PendingRequest {
    fn new(defaults: Options, verb: Option<&'static str>, target: Target) -> Self {
        Self {
            defaults,
            options: None,
            verb,
            target,
        }
    }

    /// Add per-call options, merged over the client defaults.
    ///
    /// The verb of a shorthand such as [`Client::post`] still wins over `method`.
    pub fn options(mut self, options: Options) -> Self {
        self.options = Some(match self.options.take() {
            Some(existing) => merge([existing, options]),
            None => options,
        });
        self
    }

    /// Run the call. `None` when a `before_retry` hook stopped it.
    pub async fn send(self) -> Result<Option<Response>> {
        self.execute(None).await
    }

    /// Decode the body as JSON. `None` for 204, empty bodies and stopped calls.
    pub async fn json<T: DeserializeOwned>(self) -> Result<Option<T>> {
        match self.execute(Some("application/json")).await? {
            Some(response) => response.json().await,
            None => Ok(None),
        }
    }

    /// The body as text. Empty for stopped calls.
    pub async fn text(self) -> Result<String> {
        match self.execute(Some("text/*")).await? {
            Some(response) => response.text().await,
            None => Ok(String::new()),
        }
    }

    /// The raw body. Empty for stopped calls.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.execute(Some("*/*")).await? {
            Some(response) => response.bytes().await,
            None => Ok(Bytes::new()),
        }
    }

    /// The body as form data. Empty for stopped calls.
    pub async fn form_data(self) -> Result<FormData> {
        match self.execute(Some("multipart/form-data")).await? {
            Some(response) => response.form_data().await,
            None => Ok(FormData::new()),
        }
    }

    async fn execute(self, accept: Option<&'static str>) -> Result<Option<Response>> {
        let verb = self.verb.map(|verb| Options::new().method(verb));
        let options = merge([Some(self.defaults), self.options, verb]);
        let (config, body) = Config::normalize(options)?;

        let mut request = build(self.target, &config, body)?;
        if let Some(accept) = accept {
            request
                .headers_mut()
                .entry(ACCEPT)
                .or_insert(HeaderValue::from_static(accept));
        }

        run(request, Arc::new(config)).await
    }
}

impl IntoFuture for PendingRequest {
    type Output = Result<Option<Response>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.send().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Request;
    use crate::effects::from_fn;
    use http::{Method, StatusCode};
    use std::sync::Mutex;

    fn echo_client(seen: Arc<Mutex<Vec<(Method, String, Option<String>)>>>) -> Client {
        Client::new(Options::new().prefix_url("https://api.test").transport(from_fn(
            move |request: Request| {
                let seen = Arc::clone(&seen);
                async move {
                    let accept = request
                        .headers()
                        .get(ACCEPT)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    seen.lock()
                        .unwrap()
                        .push((request.method().clone(), request.url().to_string(), accept));
                    Ok(Response::new(StatusCode::OK).with_body("{\"ok\":true}"))
                }
            },
        )))
    }

    #[tokio::test]
    async fn test_verb_wins_over_method_option() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = echo_client(Arc::clone(&seen));
        client
            .post("items")
            .options(Options::new().method("put"))
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap()[0].0, Method::POST);
    }

    #[tokio::test]
    async fn test_accept_set_only_when_absent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = echo_client(Arc::clone(&seen));

        let value: Option<serde_json::Value> = client.get("a").json().await.unwrap();
        assert_eq!(value, Some(serde_json::json!({ "ok": true })));
        client
            .get("b")
            .options(Options::new().header("accept", "application/xml"))
            .text()
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].2.as_deref(), Some("application/json"));
        assert_eq!(seen[1].2.as_deref(), Some("application/xml"));
        assert_eq!(seen[1].1, "https://api.test/b");
    }

    #[tokio::test]
    async fn test_extend_and_create() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = echo_client(Arc::clone(&seen));

        let nested = client.extend_with(|defaults| {
            let prefix = defaults.prefix_url.clone().unwrap_or_default();
            Options::new().prefix_url(format!("{prefix}/v2"))
        });
        nested.get("users").send().await.unwrap();
        assert_eq!(seen.lock().unwrap()[0].1, "https://api.test/v2/users");

        let fresh = client.create(Options::new());
        assert!(fresh.defaults().prefix_url.is_none());
        assert!(fresh.defaults().transport.is_none());
    }
}
