//! Hot cache capability trait.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::TraitError;

/// String-keyed value store supporting get/set with TTL and key-pattern scans
/// for invalidation. No transactional guarantees are required.
#[async_trait]
pub trait HotCache: Send + Sync {
    /// Reads a value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TraitError>;

    /// Writes a value with a time-to-live.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), TraitError>;

    /// Removes a value, if present. Safe to call on a missing key.
    async fn remove(&self, key: &str) -> Result<(), TraitError>;

    /// Returns all keys whose prefix matches `pattern`, for invalidation sweeps.
    async fn scan_prefix(&self, pattern: &str) -> Result<Vec<String>, TraitError>;
}
