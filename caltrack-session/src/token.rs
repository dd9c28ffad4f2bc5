//! Persisted session token with expiry

use crate::storage::KeyValueStore;
use caltrack_core::{CaltrackResult, Clock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bearer credential as it is persisted: `{ value, timestamp, expiresIn }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    /// Opaque credential issued by the backend
    pub value: String,
    /// Storage time in milliseconds since the epoch
    pub timestamp: i64,
    /// Validity window in milliseconds
    pub expires_in: i64,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, timestamp: i64, expires_in: i64) -> Self {
        Self {
            value: value.into(),
            timestamp,
            expires_in,
        }
    }

    /// Age of the token at `now`, saturating for out-of-range timestamps
    pub fn age_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.timestamp)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.age_ms(now) > self.expires_in
    }

    /// Milliseconds until expiry; negative once expired
    pub fn remaining_ms(&self, now: i64) -> i64 {
        self.expires_in.saturating_sub(self.age_ms(now))
    }
}

/// Result of reading the storage slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredToken {
    Absent,
    /// Present but not a parseable token payload
    Malformed,
    Expired(SessionToken),
    Valid(SessionToken),
}

impl StoredToken {
    /// Classify a raw storage payload
    pub fn parse(raw: Option<&str>, now: i64) -> Self {
        let Some(raw) = raw else {
            return StoredToken::Absent;
        };

        match serde_json::from_str::<SessionToken>(raw) {
            Ok(token) if token.is_expired(now) => StoredToken::Expired(token),
            Ok(token) => StoredToken::Valid(token),
            Err(_) => StoredToken::Malformed,
        }
    }
}

/// Reads and writes the token slot of a [`KeyValueStore`]
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    ttl_ms: i64,
}

impl TokenStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        ttl_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            ttl_ms,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Wrap and persist a freshly issued credential
    pub fn set(&self, raw: &str) -> CaltrackResult<SessionToken> {
        let token = SessionToken::new(raw, self.clock.now_millis(), self.ttl_ms);
        let payload = serde_json::to_string(&token)?;
        self.store.set(&self.key, &payload)?;
        debug!(key = %self.key, expires_in = self.ttl_ms, "Stored session token");
        Ok(token)
    }

    /// Inspect the slot without modifying it
    pub fn load(&self) -> StoredToken {
        match self.store.get(&self.key) {
            Ok(raw) => StoredToken::parse(raw.as_deref(), self.clock.now_millis()),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read session token");
                StoredToken::Absent
            }
        }
    }

    /// Current credential, deleting expired or malformed entries on the way
    pub fn get(&self) -> Option<String> {
        match self.load() {
            StoredToken::Valid(token) => Some(token.value),
            StoredToken::Absent => None,
            StoredToken::Expired(token) => {
                debug!(key = %self.key, issued_at = token.timestamp, "Session token expired");
                self.clear();
                None
            }
            StoredToken::Malformed => {
                debug!(key = %self.key, "Discarding malformed session token");
                self.clear();
                None
            }
        }
    }

    /// Delete the slot; returns whether an entry was removed by this call
    pub fn clear(&self) -> bool {
        match self.store.remove(&self.key) {
            Ok(previous) => previous.is_some(),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to remove session token");
                false
            }
        }
    }
}
