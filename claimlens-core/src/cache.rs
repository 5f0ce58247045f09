//! TTL cache over the storage layer.
//!
//! Entries are JSON values with an absolute expiry. Lookups never delete:
//! a stale row stays in place until the next `put` overwrites it or the
//! cleanup pipeline sweeps it, so `get_entry` can still report staleness.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::models::CacheEntry;
use crate::storage::{cache_entry_is_fresh, Storage, StorageError};

/// Result of a cache probe that distinguishes a miss from a stale hit.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Miss,
    Stale(CacheEntry),
    Fresh(CacheEntry),
}

/// Returns the cached value only when it is still fresh at `now`.
pub async fn get_fresh(
    storage: &dyn Storage,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<Value>, StorageError> {
    match get_entry(storage, key, now).await? {
        CacheLookup::Fresh(entry) => Ok(Some(entry.value)),
        CacheLookup::Stale(_) | CacheLookup::Miss => Ok(None),
    }
}

/// Probes the cache without filtering, classifying the entry by freshness.
pub async fn get_entry(
    storage: &dyn Storage,
    key: &str,
    now: DateTime<Utc>,
) -> Result<CacheLookup, StorageError> {
    match storage.cache_get(key).await? {
        None => Ok(CacheLookup::Miss),
        Some(entry) if cache_entry_is_fresh(&entry, now) => Ok(CacheLookup::Fresh(entry)),
        Some(entry) => Ok(CacheLookup::Stale(entry)),
    }
}

/// Stores `value` under `key`, expiring `ttl` after `now`. Overwrites any
/// existing entry, fresh or stale.
pub async fn put(
    storage: &dyn Storage,
    key: &str,
    value: Value,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let entry = CacheEntry {
        key: key.to_string(),
        value,
        expires_at: now + ttl,
        updated_at: now,
    };
    storage.cache_put(&entry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn fresh_entry_is_returned() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        put(&storage, "k", json!({"v": 1}), Duration::hours(1), now)
            .await
            .unwrap();

        let got = get_fresh(&storage, "k", now).await.unwrap();
        assert_eq!(got, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn expired_entry_is_a_stale_hit_not_a_fresh_one() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        put(&storage, "k", json!("old"), Duration::seconds(30), now)
            .await
            .unwrap();

        let later = now + Duration::seconds(31);
        assert_eq!(get_fresh(&storage, "k", later).await.unwrap(), None);
        match get_entry(&storage, "k", later).await.unwrap() {
            CacheLookup::Stale(entry) => assert_eq!(entry.value, json!("old")),
            other => panic!("expected stale hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let storage = MemoryStorage::new();
        assert_eq!(
            get_entry(&storage, "absent", Utc::now()).await.unwrap(),
            CacheLookup::Miss
        );
    }

    #[tokio::test]
    async fn put_overwrites_and_refreshes_expiry() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        put(&storage, "k", json!(1), Duration::seconds(10), now)
            .await
            .unwrap();
        let later = now + Duration::seconds(20);
        put(&storage, "k", json!(2), Duration::seconds(10), later)
            .await
            .unwrap();

        assert_eq!(get_fresh(&storage, "k", later).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn boundary_expiry_counts_as_stale() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        put(&storage, "k", json!(true), Duration::seconds(60), now)
            .await
            .unwrap();

        // expires_at == now is no longer fresh
        let at_expiry = now + Duration::seconds(60);
        assert_eq!(get_fresh(&storage, "k", at_expiry).await.unwrap(), None);
    }
}
