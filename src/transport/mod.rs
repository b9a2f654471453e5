//! Transport Module
//!
//! The boundary between the resilience layer and whatever actually moves bytes.
//! A transport reports every HTTP status as a response and only fails when no
//! response arrived at all.

mod reqwest_transport;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::error::{NetError, Result};

pub use reqwest_transport::ReqwestTransport;

// == Request ==
/// A request as seen by a transport. `path` is relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    /// Transport-level deadline, if the caller wants one below the queue's
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    /// Sets `Authorization: Bearer <token>`, replacing any earlier value.
    pub fn with_bearer(mut self, token: &str) -> Result<Self> {
        let value = format!("Bearer {}", token)
            .parse()
            .map_err(|_| NetError::Configuration("access token is not a valid header value".to_string()))?;
        self.headers.insert(reqwest::header::AUTHORIZATION, value);
        Ok(self)
    }

    /// Bearer token currently attached, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

// == Response ==
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Decoded JSON body; `Value::Null` for an empty body
    pub data: Value,
}

impl HttpResponse {
    pub fn new(status: StatusCode, data: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            data,
        }
    }

    /// Converts non-2xx responses into the error taxonomy.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            let body = match self.data {
                Value::Null => None,
                other => Some(other),
            };
            Err(NetError::from_status(self.status, body))
        }
    }
}

// == Transport Trait ==
/// Issues one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns `Ok` for any status the server sent; `Err(Network)` when no
    /// response was received.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}
