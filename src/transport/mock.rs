//! Scriptable in-process transport for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::Result;
use crate::transport::{HttpRequest, HttpResponse, Transport};

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync;

/// Answers every request through a closure and records what it saw.
pub struct MockTransport {
    responder: Box<Responder>,
    latency: Duration,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Self::with_latency(Duration::ZERO, responder)
    }

    pub fn with_latency<F>(latency: Duration, responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            latency,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

pub fn ok(data: Value) -> Result<HttpResponse> {
    Ok(HttpResponse::new(StatusCode::OK, data))
}

pub fn status(code: u16, data: Value) -> Result<HttpResponse> {
    let status = StatusCode::from_u16(code).unwrap();
    Ok(HttpResponse::new(status, data))
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(&request)
    }
}
