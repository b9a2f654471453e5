//! Error types for the network layer
//!
//! `NetError` is the internal taxonomy every component speaks; `ApiError` is the
//! normalized shape the client facade hands to callers.

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Message used when neither the server nor the error itself says anything useful.
pub const FALLBACK_MESSAGE: &str = "An unexpected error occurred";

// == Net Error Enum ==
/// Unified error type for the network layer.
#[derive(Error, Debug, Clone)]
pub enum NetError {
    /// No access token is stored; the request was never sent
    #[error("No authentication token available")]
    NoAuthToken,

    /// Token refresh failed or no refresh token exists
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Queue-level deadline exceeded
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Cancelled explicitly or by abort
    #[error("Request cancelled")]
    Cancelled,

    /// Pending work discarded by a queue clear
    #[error("Queue cleared")]
    QueueCleared,

    /// No response was received
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered 401
    #[error("Unauthorized")]
    Unauthorized { body: Option<Value> },

    /// Server answered 5xx
    #[error("Server error: status {status}")]
    Server { status: u16, body: Option<Value> },

    /// Server answered 400 or 422
    #[error("Validation failed: status {status}")]
    Validation { status: u16, body: Option<Value> },

    /// Server answered any other 4xx
    #[error("Client error: status {status}")]
    Client { status: u16, body: Option<Value> },

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),

    /// Client was used before being configured
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NetError {
    // == From Status ==
    /// Classifies a non-success HTTP status into the taxonomy.
    pub fn from_status(status: StatusCode, body: Option<Value>) -> Self {
        let code = status.as_u16();
        match status {
            StatusCode::UNAUTHORIZED => NetError::Unauthorized { body },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                NetError::Validation { status: code, body }
            }
            _ if status.is_server_error() => NetError::Server { status: code, body },
            _ => NetError::Client { status: code, body },
        }
    }

    /// HTTP status attached to this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetError::Unauthorized { .. } => Some(401),
            NetError::Server { status, .. }
            | NetError::Validation { status, .. }
            | NetError::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body the server sent along with the error.
    pub fn body(&self) -> Option<&Value> {
        match self {
            NetError::Unauthorized { body }
            | NetError::Server { body, .. }
            | NetError::Validation { body, .. }
            | NetError::Client { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            NetError::NoAuthToken => "NO_AUTH_TOKEN",
            NetError::SessionExpired(_) => "SESSION_EXPIRED",
            NetError::Timeout(_) => "TIMEOUT",
            NetError::Cancelled => "CANCELLED",
            NetError::QueueCleared => "QUEUE_CLEARED",
            NetError::Network(_) => "NETWORK_ERROR",
            NetError::Unauthorized { .. } => "UNAUTHORIZED",
            NetError::Server { .. } => "SERVER_ERROR",
            NetError::Validation { .. } => "VALIDATION_ERROR",
            NetError::Client { .. } => "CLIENT_ERROR",
            NetError::Decode(_) => "DECODE_ERROR",
            NetError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Transient failures a caller may reasonably try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetError::Timeout(_) | NetError::Network(_) | NetError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // The deadline is unknown here; the transport fills it in
            NetError::Timeout(0)
        } else if err.is_decode() {
            NetError::Decode(err.to_string())
        } else {
            NetError::Network(err.to_string())
        }
    }
}

// == Api Error ==
/// Normalized error shape surfaced by the client facade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    /// Human-readable message
    pub message: String,
    /// HTTP status when the server answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Stable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Field-level detail supplied by the server on validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip)]
    retryable: bool,
}

impl ApiError {
    /// Creates an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
            details: None,
            retryable: false,
        }
    }

    /// True for timeouts, network failures and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<NetError> for ApiError {
    fn from(err: NetError) -> Self {
        let server_message = err.body().and_then(server_message);
        let message = server_message.unwrap_or_else(|| {
            let own = err.to_string();
            if own.trim().is_empty() {
                FALLBACK_MESSAGE.to_string()
            } else {
                own
            }
        });
        let details = match &err {
            NetError::Validation { body: Some(body), .. } => {
                body.get("errors").or_else(|| body.get("fields")).cloned()
            }
            _ => None,
        };

        Self {
            message,
            status: err.status(),
            code: Some(err.code().to_string()),
            details,
            retryable: err.is_retryable(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {})", self.message, status),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Extracts a server-provided message from a JSON error body.
fn server_message(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => ["message", "error"]
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(|v| v.as_str().filter(|s| !s.trim().is_empty()))
            .map(str::to_string),
        _ => None,
    }
}

// == Result Type Alias ==
/// Convenience Result type for the network layer.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            NetError::from_status(StatusCode::UNAUTHORIZED, None),
            NetError::Unauthorized { .. }
        ));
        assert!(matches!(
            NetError::from_status(StatusCode::UNPROCESSABLE_ENTITY, None),
            NetError::Validation { status: 422, .. }
        ));
        assert!(matches!(
            NetError::from_status(StatusCode::BAD_REQUEST, None),
            NetError::Validation { status: 400, .. }
        ));
        assert!(matches!(
            NetError::from_status(StatusCode::NOT_FOUND, None),
            NetError::Client { status: 404, .. }
        ));
        assert!(matches!(
            NetError::from_status(StatusCode::BAD_GATEWAY, None),
            NetError::Server { status: 502, .. }
        ));
    }

    #[test]
    fn test_message_prefers_server_field() {
        let err = NetError::Client {
            status: 404,
            body: Some(json!({"message": "Content not found"})),
        };
        let api: ApiError = err.into();
        assert_eq!(api.message, "Content not found");
        assert_eq!(api.status, Some(404));
        assert_eq!(api.code.as_deref(), Some("CLIENT_ERROR"));
        assert!(!api.is_retryable());
    }

    #[test]
    fn test_message_falls_back_to_error_field_then_own_message() {
        let err = NetError::Server {
            status: 500,
            body: Some(json!({"error": "database down"})),
        };
        assert_eq!(ApiError::from(err).message, "database down");

        let err = NetError::Server {
            status: 503,
            body: Some(json!({"message": ""})),
        };
        let api = ApiError::from(err);
        assert_eq!(api.message, "Server error: status 503");
        assert!(api.is_retryable());
    }

    #[test]
    fn test_transport_message_used_without_body() {
        let api: ApiError = NetError::Network("connection refused".to_string()).into();
        assert_eq!(api.message, "Network error: connection refused");
        assert_eq!(api.status, None);
        assert!(api.is_retryable());
    }

    #[test]
    fn test_validation_details() {
        let err = NetError::Validation {
            status: 422,
            body: Some(json!({
                "message": "Invalid paywall",
                "errors": {"price": "must be positive"}
            })),
        };
        let api = ApiError::from(err);
        assert_eq!(api.details, Some(json!({"price": "must be positive"})));
    }

    #[test]
    fn test_api_error_serialize_skips_empty_fields() {
        let json = serde_json::to_string(&ApiError::new("boom")).unwrap();
        assert_eq!(json, r#"{"message":"boom"}"#);
    }
}
