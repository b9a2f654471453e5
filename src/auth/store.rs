//! Credential persistence boundary.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// Key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Key holding the access token expiry as RFC 3339
pub const TOKEN_EXPIRES_AT_KEY: &str = "token_expires_at";

// == Token Store Trait ==
/// String key-value store that outlives the process (browser storage, keychain,
/// file). Implementations must not fail loudly; a broken store reads as empty.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

// == Credentials ==
/// Access/refresh token pair as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// When the access token stops being accepted, if known
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Tokens without a known expiry are treated as valid until the server says otherwise.
    ///
    /// # Arguments
    /// * `now` - Current wall-clock time
    /// * `leeway` - How early before `expires_at` the token already counts as expired
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: chrono::Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        match now.checked_add_signed(leeway) {
            Some(deadline) => deadline >= expires_at,
            // Out of chrono's range: a huge positive leeway expires everything
            None => leeway > chrono::Duration::zero(),
        }
    }

    // == Load / Save ==
    pub fn load(store: &dyn TokenStore) -> Option<Self> {
        let access_token = store.get(ACCESS_TOKEN_KEY)?;
        let expires_at = store
            .get(TOKEN_EXPIRES_AT_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Some(Self {
            access_token,
            refresh_token: store.get(REFRESH_TOKEN_KEY),
            expires_at,
        })
    }

    pub fn save(&self, store: &dyn TokenStore) {
        store.set(ACCESS_TOKEN_KEY, &self.access_token);
        match &self.refresh_token {
            Some(token) => store.set(REFRESH_TOKEN_KEY, token),
            None => store.remove(REFRESH_TOKEN_KEY),
        }
        match self.expires_at {
            Some(expires_at) => store.set(TOKEN_EXPIRES_AT_KEY, &expires_at.to_rfc3339()),
            None => store.remove(TOKEN_EXPIRES_AT_KEY),
        }
    }

    pub fn clear(store: &dyn TokenStore) {
        store.remove(ACCESS_TOKEN_KEY);
        store.remove(REFRESH_TOKEN_KEY);
        store.remove(TOKEN_EXPIRES_AT_KEY);
    }
}

// == Memory Store ==
/// Process-local store, for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: &Credentials) -> Self {
        let store = Self::new();
        credentials.save(&store);
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
