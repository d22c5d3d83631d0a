//! Progress-reporting body streams.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt, ready};
use http::StatusCode;
use http::header::CONTENT_LENGTH;

use crate::data::{Body, Progress, ProgressCallback, Response};
use crate::error::BoxError;

/// Upload completion for one chunk event.
///
/// Rounded to two decimals and held at `0.99` until the stream ends, so that
/// only the end-of-stream event reports `1.0`. Zero while the total is unknown.
pub fn upload_percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = (transferred as f64 / total as f64 * 100.0).round() / 100.0;
    if transferred > total || percent >= 1.0 {
        0.99
    } else {
        percent
    }
}

/// Reports upload progress as the transport reads the request body.
pub struct UploadProgress<S> {
    inner: S,
    total: u64,
    transferred: u64,
    on_progress: ProgressCallback,
    finished: bool,
}

impl<S> UploadProgress<S> {
    /// `total` is the upfront size estimate, `0` when unknown.
    pub fn new(inner: S, total: u64, on_progress: ProgressCallback) -> Self {
        Self {
            inner,
            total,
            transferred: 0,
            on_progress,
            finished: false,
        }
    }
}

impl<S> Stream for UploadProgress<S>
where
    S: Stream<Item = Result<Bytes, BoxError>> + Unpin,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => {
                this.transferred += chunk.len() as u64;
                let progress = Progress::new(
                    upload_percent(this.transferred, this.total),
                    this.transferred,
                    this.total,
                );
                (this.on_progress)(progress, &chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => {
                this.finished = true;
                let total = this.total.max(this.transferred);
                (this.on_progress)(Progress::new(1.0, this.transferred, total), &[]);
                Poll::Ready(None)
            }
        }
    }
}

/// Reports download progress as the caller reads the response body.
pub struct DownloadProgress<S> {
    inner: S,
    total: u64,
    transferred: u64,
    last_percent: f64,
    on_progress: ProgressCallback,
    finished: bool,
}

impl<S> DownloadProgress<S> {
    pub fn new(inner: S, total: u64, on_progress: ProgressCallback) -> Self {
        Self {
            inner,
            total,
            transferred: 0,
            last_percent: 0.0,
            on_progress,
            finished: false,
        }
    }
}

impl<S> Stream for DownloadProgress<S>
where
    S: Stream<Item = Result<Bytes, BoxError>> + Unpin,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => {
                this.transferred += chunk.len() as u64;
                let percent = if this.total == 0 {
                    0.0
                } else {
                    (this.transferred as f64 / this.total as f64).min(1.0)
                };
                this.last_percent = percent;
                (this.on_progress)(
                    Progress::new(percent, this.transferred, this.total),
                    &chunk,
                );
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => {
                this.finished = true;
                if this.last_percent < 1.0 {
                    let total = this.total.max(this.transferred);
                    (this.on_progress)(Progress::new(1.0, this.transferred, total), &[]);
                }
                Poll::Ready(None)
            }
        }
    }
}

/// Wrap the response body so that reading it reports download progress.
///
/// The initial `0` event is emitted immediately. A 204 response reports a single
/// completed event and has its body emptied.
pub fn stream_response(response: Response, on_progress: ProgressCallback) -> Response {
    let total = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0);

    if response.status() == StatusCode::NO_CONTENT {
        on_progress(Progress::new(1.0, 0, total), &[]);
        return response.map_body(|_| Body::empty());
    }

    on_progress(Progress::new(0.0, 0, total), &[]);
    response.map_body(|body| {
        Body::from_stream(DownloadProgress::new(body.into_stream(), total, on_progress))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use futures_util::stream;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<Progress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Arc::new(move |progress, _chunk| {
            sink.lock().unwrap().push(progress);
        });
        (callback, events)
    }

    fn chunks(parts: &[&'static str]) -> futures_util::stream::BoxStream<'static, Result<Bytes, BoxError>> {
        let parts: Vec<Result<Bytes, BoxError>> = parts
            .iter()
            .copied()
            .map(|part| Ok(Bytes::from_static(part.as_bytes())))
            .collect();
        stream::iter(parts).boxed()
    }

    #[test]
    fn test_upload_percent_rounding_and_clamp() {
        assert_eq!(upload_percent(1, 3), 0.33);
        assert_eq!(upload_percent(2, 3), 0.67);
        assert_eq!(upload_percent(10, 10), 0.99);
        assert_eq!(upload_percent(999, 1000), 0.99);
        assert_eq!(upload_percent(20, 10), 0.99);
        assert_eq!(upload_percent(5, 0), 0.0);
    }

    #[tokio::test]
    async fn test_upload_ends_with_single_complete_event() {
        let (callback, events) = recorder();
        let upload = UploadProgress::new(chunks(&["ab", "cd"]), 4, callback);
        let body: Vec<Bytes> = upload.try_collect().await.unwrap();
        assert_eq!(body.len(), 2);

        let events = events.lock().unwrap();
        let percents: Vec<f64> = events.iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![0.5, 0.99, 1.0]);
        assert_eq!(events.iter().filter(|p| p.percent == 1.0).count(), 1);
    }

    #[tokio::test]
    async fn test_upload_underestimated_total() {
        let (callback, events) = recorder();
        let upload = UploadProgress::new(chunks(&["abcdef"]), 2, callback);
        let _: Vec<Bytes> = upload.try_collect().await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0].percent, 0.99);
        assert_eq!(*events.last().unwrap(), Progress::new(1.0, 6, 6));
    }

    #[tokio::test]
    async fn test_download_progress_is_monotonic() {
        let (callback, events) = recorder();
        let response = Response::new(StatusCode::OK)
            .with_header(CONTENT_LENGTH, http::HeaderValue::from_static("6"))
            .with_body(Body::chunks(vec![
                Bytes::from_static(b"ab"),
                Bytes::from_static(b"cd"),
                Bytes::from_static(b"ef"),
            ]));
        let response = stream_response(response, callback);
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"abcdef"));

        let events = events.lock().unwrap();
        let percents: Vec<f64> = events.iter().map(|p| p.percent).collect();
        assert_eq!(percents.first(), Some(&0.0));
        assert_eq!(percents.last(), Some(&1.0));
        assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(events.iter().filter(|p| p.percent == 1.0).count(), 1);
    }

    #[tokio::test]
    async fn test_download_unknown_total_completes() {
        let (callback, events) = recorder();
        let response = Response::new(StatusCode::OK).with_body(Body::chunks(vec![
            Bytes::from_static(b"abc"),
        ]));
        let _ = stream_response(response, callback).bytes().await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                Progress::new(0.0, 0, 0),
                Progress::new(0.0, 3, 0),
                Progress::new(1.0, 3, 3),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_content_single_event() {
        let (callback, events) = recorder();
        let response = Response::new(StatusCode::NO_CONTENT).with_body("ignored");
        let response = stream_response(response, callback);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.bytes().await.unwrap().is_empty());

        let events = events.lock().unwrap();
        assert_eq!(*events, vec![Progress::new(1.0, 0, 0)]);
    }
}
