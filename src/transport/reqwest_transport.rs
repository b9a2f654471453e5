//! `reqwest`-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{NetError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Sends requests relative to a base URL with a shared connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.url(&request.path);
        debug!(method = %request.method, url = %url, "sending request");

        let mut builder = self
            .http
            .request(request.method, &url)
            .headers(request.headers)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let timeout = request.timeout;
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| send_error(err, timeout))?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|err| send_error(err, timeout))?;
        let data = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(err) if status.is_success() => return Err(NetError::Decode(err.to_string())),
                // Non-JSON error pages are kept as a string body
                Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            }
        };

        Ok(HttpResponse {
            status,
            headers,
            data,
        })
    }
}

/// Reports a reqwest deadline as `Timeout` with the deadline that was set.
fn send_error(err: reqwest::Error, timeout: Option<Duration>) -> NetError {
    match NetError::from(err) {
        NetError::Timeout(_) => {
            NetError::Timeout(timeout.map(|t| t.as_millis() as u64).unwrap_or(0))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let transport = ReqwestTransport::new("http://localhost:3000/api/");
        assert_eq!(transport.base_url(), "http://localhost:3000/api");
        assert_eq!(transport.url("/content"), "http://localhost:3000/api/content");
        assert_eq!(transport.url("paywalls/1"), "http://localhost:3000/api/paywalls/1");
    }
}
