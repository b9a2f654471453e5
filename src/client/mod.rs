//! Client Module
//!
//! The HTTP facade the dashboard talks to, plus the process-wide default.

mod http_client;
mod options;

pub use http_client::{
    default_client, http_delete, http_get, http_patch, http_post, http_put, install_default,
    ClientBuilder, HttpClient, DEFAULT_SERVER_RETRY_DELAY,
};
pub use options::RequestOptions;

/// Result returned by facade calls.
pub type ApiResult<T> = std::result::Result<T, crate::error::ApiError>;
