//! Upload and download progress reported through a full call.

mod common;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::StatusCode;
use pulith_http::{BoxError, Client, FormData, Options, Progress, Request, Response, from_fn};

use common::{Mock, status};

fn recorder() -> (Arc<Mutex<Vec<(Progress, usize)>>>, impl Fn(Progress, &[u8]) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |progress: Progress, chunk: &[u8]| {
        sink.lock().unwrap().push((progress, chunk.len()));
    })
}

#[tokio::test]
async fn test_download_progress_monotonic_and_complete() {
    let mock = Mock::new([status(200)
        .header("content-length", "11")
        .body("hello world")]);
    let (events, on_progress) = recorder();

    let text = Client::new(Options::new().shared_transport(mock.clone()))
        .get("https://files.test/a.txt")
        .options(Options::new().on_download_progress(on_progress))
        .text()
        .await
        .unwrap();
    assert_eq!(text, "hello world");

    let events = events.lock().unwrap();
    let first = events.first().unwrap().0;
    let last = events.last().unwrap().0;
    assert_eq!(first, Progress::new(0.0, 0, 11));
    assert_eq!(last.percent, 1.0);
    assert_eq!(last.transferred_bytes, 11);
    assert!(events.windows(2).all(|pair| pair[0].0.percent <= pair[1].0.percent));
    assert_eq!(events.iter().filter(|(p, _)| p.percent == 1.0).count(), 1);
}

#[tokio::test]
async fn test_download_no_content_single_event() {
    let mock = Mock::new([status(204)]);
    let (events, on_progress) = recorder();

    let response = Client::new(Options::new().shared_transport(mock.clone()))
        .delete("https://files.test/a.txt")
        .options(Options::new().on_download_progress(on_progress))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let events = events.lock().unwrap();
    assert_eq!(*events, vec![(Progress::new(1.0, 0, 0), 0)]);
}

#[tokio::test]
async fn test_upload_progress_ends_at_one() {
    let received = Arc::new(Mutex::new(Bytes::new()));
    let sink = Arc::clone(&received);
    let transport = from_fn(move |mut request: Request| {
        let sink = Arc::clone(&sink);
        async move {
            if let Some(body) = request.take_body() {
                *sink.lock().unwrap() = body.collect().await?;
            }
            Ok::<_, BoxError>(Response::new(StatusCode::OK))
        }
    });
    let (events, on_progress) = recorder();

    Client::new(Options::new().transport(transport))
        .post("https://files.test/upload")
        .options(
            Options::new()
                .body(FormData::new().text("name", "pulith").text("kind", "http"))
                .on_upload_progress(on_progress),
        )
        .await
        .unwrap();

    assert!(!received.lock().unwrap().is_empty());
    let events = events.lock().unwrap();
    let percents: Vec<f64> = events.iter().map(|(p, _)| p.percent).collect();
    assert_eq!(percents.last(), Some(&1.0));
    assert_eq!(percents.iter().filter(|p| **p == 1.0).count(), 1);
    assert!(percents[..percents.len() - 1].iter().all(|p| *p <= 0.99));
}

#[tokio::test]
async fn test_upload_progress_unsupported_transport() {
    let transport =
        from_fn(|_request: Request| async { Ok(Response::new(StatusCode::OK)) }).without_request_streams();
    let (_, on_progress) = recorder();

    let error = Client::new(Options::new().transport(transport))
        .post("https://files.test/upload")
        .options(Options::new().body("data").on_upload_progress(on_progress))
        .await
        .unwrap_err();

    assert!(matches!(error, pulith_http::Error::Unsupported(_)));
}
