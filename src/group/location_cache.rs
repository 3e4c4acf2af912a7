use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use moka::future::Cache;

use crate::blob_store::BlobId;

/// Default entry lifetime, measured from insertion.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);
pub const DEFAULT_MAX_ENTRIES: u64 = 1_000_000;
pub const CACHE_NAME: &str = "blob-locations";

/// Best-effort index from blob id to the name of the member believed to hold it.
/// A hit is a hint, a miss proves nothing.
#[derive(Clone)]
pub struct LocationCache {
    name: String,
    entries: Cache<BlobId, String>,
}

impl LocationCache {
    pub fn new(name: impl Into<String>, ttl: Duration, max_entries: u64) -> Self {
        let name = name.into();
        let entries = Cache::builder()
            .name(&name)
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { name, entries }
    }

    pub async fn get(&self, blob_id: &BlobId) -> Option<String> {
        self.entries.get(blob_id).await
    }

    pub async fn insert(&self, blob_id: BlobId, member: impl Into<String>) {
        self.entries.insert(blob_id, member.into()).await;
    }

    pub async fn invalidate(&self, blob_id: &BlobId) {
        self.entries.invalidate(blob_id).await;
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }
}

/// Hands out location caches by name. Injected into routers so cache lifetime
/// follows the router's start/stop rather than the process.
#[derive(Default)]
pub struct CacheManager {
    caches: Mutex<HashMap<String, LocationCache>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cache registered under `name`, creating it if needed.
    pub fn location_cache(&self, name: &str, ttl: Duration, max_entries: u64) -> LocationCache {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        caches
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(cache = name, ttl_secs = ttl.as_secs(), "Created location cache");
                LocationCache::new(name, ttl, max_entries)
            })
            .clone()
    }

    /// Invalidate and forget the cache registered under `name`.
    pub fn destroy(&self, name: &str) {
        let removed = self
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(cache) = removed {
            cache.invalidate_all();
            tracing::debug!(cache = %cache.name, "Destroyed location cache");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
