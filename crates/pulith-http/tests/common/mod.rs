//! Scripted transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use pulith_http::{BoxError, Request, Response, Transport};

/// One scripted response.
#[derive(Clone)]
pub struct Step {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: &'static str,
}

pub fn status(status: u16) -> Step {
    Step {
        status,
        headers: Vec::new(),
        body: "",
    }
}

impl Step {
    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn body(mut self, body: &'static str) -> Self {
        self.body = body;
        self
    }

    fn response(&self) -> Response {
        let mut response = Response::new(StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK))
            .with_body(self.body);
        for &(name, value) in &self.headers {
            response = response.with_header(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        response
    }
}

/// Replies with the scripted steps in order, repeating the last one.
pub struct Mock {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    requests: Mutex<Vec<Request>>,
}

impl Mock {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Heads of every request received so far.
    pub fn requests(&self) -> MutexGuard<'_, Vec<Request>> {
        self.requests.lock().unwrap()
    }
}

#[async_trait]
impl Transport for Mock {
    async fn send(&self, request: Request) -> Result<Response, BoxError> {
        self.requests.lock().unwrap().push(request.clone_head());

        let next = self.steps.lock().unwrap().pop_front();
        let step = match next {
            Some(step) => {
                *self.last.lock().unwrap() = Some(step.clone());
                step
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or("mock transport has no scripted response")?,
        };
        Ok(step.response())
    }
}
