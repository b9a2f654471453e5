//! Authentication Module
//!
//! Credential persistence and the single-flight token refresh.

mod coordinator;
mod store;

pub use coordinator::{
    CoordinatorBuilder, CredentialState, SessionEvent, TokenCoordinator, DEFAULT_REFRESH_PATH,
    SESSION_EXPIRED_EVENT, SESSION_REFRESHED_EVENT,
};
pub use store::{
    Credentials, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
    TOKEN_EXPIRES_AT_KEY,
};
