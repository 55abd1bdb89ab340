//! Durable hot-cache backend on top of `redb`, for deployments that want the
//! served cache to survive a process restart rather than start cold.
//!
//! Each value is stored alongside its absolute expiry (as epoch millis) so a
//! reader can discard stale rows without a separate sweeper thread.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use refinery_traits::{HotCache, TraitError};

const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hot_cache");

#[derive(Serialize, Deserialize)]
struct StoredValue {
    value: Vec<u8>,
    expires_at_millis: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Redb-backed implementation of [`HotCache`].
pub struct RedbHotCache {
    db: Arc<Database>,
}

impl RedbHotCache {
    /// Opens (or creates) a redb-backed cache at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraitError> {
        let db = Database::create(path).map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        {
            let txn = db
                .begin_write()
                .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
            txn.open_table(CACHE_TABLE)
                .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
            txn.commit().map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        }
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl HotCache for RedbHotCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TraitError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        let table = match txn.open_table(CACHE_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(TraitError::DatabaseError(e.to_string())),
        };
        match table.get(key).map_err(|e| TraitError::DatabaseError(e.to_string()))? {
            Some(bytes) => {
                let stored: StoredValue = serde_json::from_slice(bytes.value())
                    .map_err(|e| TraitError::ParseError(e.to_string()))?;
                if stored.expires_at_millis > now_millis() {
                    Ok(Some(stored.value))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), TraitError> {
        let stored = StoredValue {
            value,
            expires_at_millis: now_millis() + ttl.as_millis() as u64,
        };
        let bytes = serde_json::to_vec(&stored).map_err(|e| TraitError::SerializationError(e.to_string()))?;
        let txn = self
            .db
            .begin_write()
            .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        {
            let mut table = txn
                .open_table(CACHE_TABLE)
                .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        }
        txn.commit().map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), TraitError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        {
            let mut table = txn
                .open_table(CACHE_TABLE)
                .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        }
        txn.commit().map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn scan_prefix(&self, pattern: &str) -> Result<Vec<String>, TraitError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| TraitError::DatabaseError(e.to_string()))?;
        let table = match txn.open_table(CACHE_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(TraitError::DatabaseError(e.to_string())),
        };
        let mut matches = Vec::new();
        for row in table.iter().map_err(|e| TraitError::DatabaseError(e.to_string()))? {
            let (key, _) = row.map_err(|e| TraitError::DatabaseError(e.to_string()))?;
            if key.value().starts_with(pattern) {
                matches.push(key.value().to_string());
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RedbHotCache::open(dir.path().join("cache.redb")).unwrap();
        cache.set("k", b"v".to_vec(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_read_back_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RedbHotCache::open(dir.path().join("cache.redb")).unwrap();
        cache.set("k", b"v".to_vec(), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
