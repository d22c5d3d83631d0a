use std::fmt;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::data::body::Body;
use crate::data::form::FormData;
use crate::data::options::JsonParser;
use crate::error::{Error, Result};

/// A response produced by a transport or synthesized by a hook.
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    url: Option<Url>,
    body: Body,
    parse_json: Option<JsonParser>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            url: None,
            body: Body::empty(),
            parse_json: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Override the reason phrase reported by [`status_text`](Self::status_text).
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Decoder used by [`json`](Self::json) instead of `serde_json`.
    #[must_use]
    pub fn with_json_parser(mut self, parser: JsonParser) -> Self {
        self.parse_json = Some(parser);
        self
    }

    /// Replace the body, keeping status, headers and decoder.
    #[must_use]
    pub fn map_body(mut self, f: impl FnOnce(Body) -> Body) -> Self {
        let body = std::mem::take(&mut self.body);
        self.body = f(body);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `true` for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_text(&self) -> Option<&str> {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Clone the response. `None` while the body is an unread stream.
    pub fn try_clone(&self) -> Option<Response> {
        Some(Response {
            status: self.status,
            reason: self.reason.clone(),
            headers: self.headers.clone(),
            url: self.url.clone(),
            body: self.body.try_clone()?,
            parse_json: self.parse_json.clone(),
        })
    }

    /// Buffer the body and return two independent copies.
    pub async fn duplicate(mut self) -> Result<(Response, Response)> {
        let body = std::mem::take(&mut self.body);
        self.body = body.buffer().await?;
        let copy = self
            .try_clone()
            .ok_or(Error::Unsupported("buffered body could not be cloned"))?;
        Ok((self, copy))
    }

    pub async fn bytes(self) -> Result<Bytes> {
        self.body.collect().await
    }

    /// Body decoded as UTF-8. Invalid sequences are replaced.
    pub async fn text(self) -> Result<String> {
        let bytes = self.body.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Body decoded as JSON. `None` for 204 responses and empty payloads.
    pub async fn json<T: DeserializeOwned>(self) -> Result<Option<T>> {
        if self.status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let parser = self.parse_json.clone();
        let bytes = self.body.collect().await?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let value = match parser {
            Some(parse) => {
                let text = String::from_utf8_lossy(&bytes);
                let value = parse(&text[..]).map_err(Error::Decode)?;
                serde_json::from_value(value)
            }
            None => serde_json::from_slice(&bytes),
        };
        value.map(Some).map_err(|e| Error::Decode(Box::new(e)))
    }

    /// Body decoded as `multipart/form-data` or `application/x-www-form-urlencoded`.
    pub async fn form_data(self) -> Result<FormData> {
        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "multipart/form-data" => {
                let boundary = content_type
                    .split(';')
                    .skip(1)
                    .filter_map(|param| param.trim().split_once('='))
                    .find(|(key, _)| key.eq_ignore_ascii_case("boundary"))
                    .map(|(_, value)| value.trim_matches('"').to_string())
                    .ok_or_else(|| Error::Decode("multipart response without boundary".into()))?;
                let bytes = self.body.collect().await?;
                FormData::parse_multipart(&bytes, &boundary)
            }
            "application/x-www-form-urlencoded" => {
                let bytes = self.body.collect().await?;
                Ok(FormData::parse_urlencoded(&bytes))
            }
            _ => Err(Error::Decode(
                format!("cannot decode form data from content type '{content_type}'").into(),
            )),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
