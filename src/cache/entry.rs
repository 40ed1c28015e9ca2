//! Stored Entry Module
//!
//! Defines the on-disk record for a cache entry: an expiration header
//! followed by the encoded value text.

use std::time::Duration;

use crate::error::{CacheError, Result};

/// Length of the expiration header in bytes
const HEADER_LEN: usize = 8;

// == Stored Entry ==
/// A single cache record as kept in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// The encoded value text
    pub text: String,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl StoredEntry {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` from now.
    ///
    /// A zero `ttl` means the entry never expires.
    pub fn new(text: String, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            Some(current_timestamp_ms().saturating_add(ttl_ms))
        };

        Self { text, expires_at }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at the given instant.
    ///
    /// An entry is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        is_expired(self.expires_at, now_ms)
    }

    // == Encode ==
    /// Serializes the entry into its stored record form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.text.len());
        bytes.extend_from_slice(&self.expires_at.unwrap_or(0).to_be_bytes());
        bytes.extend_from_slice(self.text.as_bytes());
        bytes
    }

    // == Decode ==
    /// Parses a stored record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let expires_at = read_expiry(bytes)?;
        let text = std::str::from_utf8(&bytes[HEADER_LEN..])
            .map_err(|e| CacheError::Decode(e.to_string()))?
            .to_string();

        Ok(Self { text, expires_at })
    }
}

/// Reads only the expiration header of a stored record.
pub fn read_expiry(bytes: &[u8]) -> Result<Option<u64>> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| {
            CacheError::Decode(format!("truncated record of {} bytes", bytes.len()))
        })?;

    match u64::from_be_bytes(header) {
        0 => Ok(None),
        at => Ok(Some(at)),
    }
}

/// Shared expiry predicate for full entries and bare headers.
pub fn is_expired(expires_at: Option<u64>, now_ms: u64) -> bool {
    matches!(expires_at, Some(at) if now_ms >= at)
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
