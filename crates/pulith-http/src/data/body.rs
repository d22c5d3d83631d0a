//! Request and response bodies.

use std::fmt;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};

use crate::data::form::{FormData, generate_boundary};
use crate::data::progress::ProgressCallback;
use crate::effects::progress::UploadProgress;
use crate::error::{BoxError, Error, Result};

/// A one-shot stream of body chunks.
///
/// The stream sits behind a mutex so that bodies, and therefore requests and
/// responses, are `Sync`. Polling goes through `Mutex::get_mut` and never locks.
pub struct BodyStream(Mutex<BoxStream<'static, std::result::Result<Bytes, BoxError>>>);

impl BodyStream {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self(Mutex::new(stream.map_err(Into::into).boxed()))
    }
}

impl Stream for BodyStream {
    type Item = std::result::Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = self
            .get_mut()
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyStream")
    }
}

/// A request or response body.
///
/// Buffered bodies can be cloned cheaply for retries. Stream bodies are consumed
/// by the first send and cannot be replayed.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Bytes(Bytes),
    Text(Bytes),
    Form {
        form: FormData,
        boundary: String,
    },
    UrlEncoded(String),
    Chunks(Vec<Bytes>),
    Stream(BodyStream),
    Observed {
        inner: Box<Body>,
        on_progress: ProgressCallback,
    },
}

impl Body {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Bytes(bytes.into()),
        }
    }

    /// UTF-8 text, sent as `text/plain;charset=UTF-8` unless a content type is set.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: Kind::Text(Bytes::from(text.into())),
        }
    }

    pub fn form(form: FormData) -> Self {
        Self {
            kind: Kind::Form {
                form,
                boundary: generate_boundary(),
            },
        }
    }

    pub fn url_encoded<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self {
            kind: Kind::UrlEncoded(encoded),
        }
    }

    /// A replayable body made of pre-split chunks, streamed in order.
    pub fn chunks(chunks: Vec<Bytes>) -> Self {
        Self {
            kind: Kind::Chunks(chunks),
        }
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            kind: Kind::Stream(BodyStream::new(stream)),
        }
    }

    /// Wrap this body so that reading it reports upload progress.
    #[must_use]
    pub fn with_upload_progress(self, on_progress: ProgressCallback) -> Self {
        Self {
            kind: Kind::Observed {
                inner: Box::new(self),
                on_progress,
            },
        }
    }

    /// Clone the body for another send. `None` for one-shot streams.
    pub fn try_clone(&self) -> Option<Body> {
        let kind = match &self.kind {
            Kind::Empty => Kind::Empty,
            Kind::Bytes(bytes) => Kind::Bytes(bytes.clone()),
            Kind::Text(bytes) => Kind::Text(bytes.clone()),
            Kind::Form { form, boundary } => Kind::Form {
                form: form.clone(),
                boundary: boundary.clone(),
            },
            Kind::UrlEncoded(text) => Kind::UrlEncoded(text.clone()),
            Kind::Chunks(chunks) => Kind::Chunks(chunks.clone()),
            Kind::Stream(_) => return None,
            Kind::Observed { inner, on_progress } => Kind::Observed {
                inner: Box::new(inner.try_clone()?),
                on_progress: on_progress.clone(),
            },
        };
        Some(Self { kind })
    }

    pub fn is_empty(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Bytes(bytes) | Kind::Text(bytes) => bytes.is_empty(),
            Kind::Chunks(chunks) => chunks.iter().all(Bytes::is_empty),
            _ => false,
        }
    }

    pub fn is_stream(&self) -> bool {
        match &self.kind {
            Kind::Stream(_) => true,
            Kind::Observed { inner, .. } => inner.is_stream(),
            _ => false,
        }
    }

    /// Whether this is a multipart or url-encoded form.
    pub fn is_form(&self) -> bool {
        match &self.kind {
            Kind::Form { .. } | Kind::UrlEncoded(_) => true,
            Kind::Observed { inner, .. } => inner.is_form(),
            _ => false,
        }
    }

    /// Size estimate used as the upload progress total. `0` when unknown.
    pub fn estimated_size(&self) -> u64 {
        match &self.kind {
            Kind::Empty | Kind::Stream(_) => 0,
            Kind::Bytes(bytes) | Kind::Text(bytes) => bytes.len() as u64,
            Kind::Form { form, .. } => form.estimated_size(),
            Kind::UrlEncoded(text) => text.len() as u64,
            Kind::Chunks(chunks) => chunks.iter().map(|c| c.len() as u64).sum(),
            Kind::Observed { inner, .. } => inner.estimated_size(),
        }
    }

    /// Exact length when known without encoding or reading the body.
    pub fn content_length(&self) -> Option<u64> {
        match &self.kind {
            Kind::Empty => Some(0),
            Kind::Bytes(_) | Kind::Text(_) | Kind::UrlEncoded(_) | Kind::Chunks(_) => {
                Some(self.estimated_size())
            }
            Kind::Observed { inner, .. } => inner.content_length(),
            Kind::Form { .. } | Kind::Stream(_) => None,
        }
    }

    /// Content type implied by the body kind.
    pub fn content_type(&self) -> Option<String> {
        match &self.kind {
            Kind::Text(_) => Some("text/plain;charset=UTF-8".to_string()),
            Kind::Form { boundary, .. } => Some(format!("multipart/form-data; boundary={boundary}")),
            Kind::UrlEncoded(_) => {
                Some("application/x-www-form-urlencoded;charset=UTF-8".to_string())
            }
            Kind::Observed { inner, .. } => inner.content_type(),
            _ => None,
        }
    }

    /// The full payload when it is available without reading a stream.
    ///
    /// Progress-observed bodies return `None` so that the transport streams them
    /// and the callback sees every chunk.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match &self.kind {
            Kind::Empty => Some(Bytes::new()),
            Kind::Bytes(bytes) | Kind::Text(bytes) => Some(bytes.clone()),
            Kind::Form { form, boundary } => Some(form.encode(boundary)),
            Kind::UrlEncoded(text) => Some(Bytes::from(text.clone())),
            Kind::Chunks(chunks) => Some(concat(chunks)),
            Kind::Stream(_) | Kind::Observed { .. } => None,
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, std::result::Result<Bytes, BoxError>> {
        match self.kind {
            Kind::Empty => stream::empty().boxed(),
            Kind::Chunks(chunks) => stream::iter(chunks.into_iter().map(Ok)).boxed(),
            Kind::Stream(body) => body.boxed(),
            Kind::Observed { inner, on_progress } => {
                let total = inner.estimated_size();
                UploadProgress::new(inner.into_stream(), total, on_progress).boxed()
            }
            kind => {
                let bytes = Body { kind }.to_bytes().unwrap_or_default();
                if bytes.is_empty() {
                    stream::empty().boxed()
                } else {
                    stream::once(async move { Ok(bytes) }).boxed()
                }
            }
        }
    }

    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        if let Some(bytes) = self.to_bytes() {
            return Ok(bytes);
        }
        let chunks: Vec<Bytes> = self.into_stream().try_collect().await.map_err(Error::Body)?;
        Ok(concat(&chunks))
    }

    /// Make the body replayable, reading a stream into memory if needed.
    ///
    /// Chunk boundaries are preserved.
    pub async fn buffer(self) -> Result<Body> {
        if !matches!(self.kind, Kind::Stream(_) | Kind::Observed { .. }) {
            return Ok(self);
        }
        let chunks = self.into_stream().try_collect().await.map_err(Error::Body)?;
        Ok(Body::chunks(chunks))
    }

    /// Drop a body that will never be sent.
    pub fn release(self) {
        tracing::trace!(kind = self.kind_name(), "releasing unsent body");
    }

    fn kind_name(&self) -> &'static str {
        match &self.kind {
            Kind::Empty => "empty",
            Kind::Bytes(_) => "bytes",
            Kind::Text(_) => "text",
            Kind::Form { .. } => "multipart",
            Kind::UrlEncoded(_) => "urlencoded",
            Kind::Chunks(_) => "chunks",
            Kind::Stream(_) => "stream",
            Kind::Observed { .. } => "observed",
        }
    }
}

fn concat(chunks: &[Bytes]) -> Bytes {
    match chunks {
        [] => Bytes::new(),
        [single] => single.clone(),
        _ => {
            let mut out = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in chunks {
                out.extend_from_slice(chunk);
            }
            out.freeze()
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("kind", &self.kind_name())
            .field("estimated_size", &self.estimated_size())
            .finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<FormData> for Body {
    fn from(form: FormData) -> Self {
        Self::form(form)
    }
}
