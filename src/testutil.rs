//! Shared test helpers for in-crate router tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::blob_store::{
    Blob, BlobId, BlobInUseChecker, BlobStore, BlobStoreError, Headers, MemoryStore,
    StoreConfiguration, StoreMetrics,
};
use crate::group::location_cache::CacheManager;
use crate::group::placement::StrategyRegistry;
use crate::group::{GroupConfiguration, GroupStore};
use crate::registry::StoreManager;

/// A memory store that counts calls and can be told to misbehave.
pub struct CountingStore {
    inner: MemoryStore,
    pub exists_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub fail_deletes: AtomicBool,
    create_delay: Option<Duration>,
}

impl CountingStore {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::wrap(MemoryStore::new(name), None))
    }

    pub fn read_only(name: &str) -> Arc<Self> {
        Arc::new(Self::wrap(MemoryStore::read_only(name), None))
    }

    /// Every create sleeps for `delay` before completing.
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::wrap(MemoryStore::new(name), Some(delay)))
    }

    fn wrap(inner: MemoryStore, create_delay: Option<Duration>) -> Self {
        Self {
            inner,
            exists_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
            create_delay,
        }
    }

    pub async fn seed(&self, blob_id: &str, data: &str) {
        self.inner
            .seed(BlobId::from(blob_id), Bytes::from(data.to_string()), Headers::new())
            .await;
    }

    pub fn exists_count(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.exists_calls.store(0, Ordering::SeqCst);
        self.get_calls.store(0, Ordering::SeqCst);
        self.create_calls.store(0, Ordering::SeqCst);
        self.delete_calls.store(0, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> usize {
        self.exists_count()
            + self.get_count()
            + self.create_count()
            + self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingStore {
    async fn create(
        &self,
        data: Bytes,
        headers: Headers,
        blob_id: Option<BlobId>,
    ) -> Result<Blob, BlobStoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.create(data, headers, blob_id).await
    }

    async fn get(
        &self,
        blob_id: &BlobId,
        include_deleted: bool,
    ) -> Result<Option<Blob>, BlobStoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(blob_id, include_deleted).await
    }

    async fn copy(&self, blob_id: &BlobId, headers: Headers) -> Result<Blob, BlobStoreError> {
        self.inner.copy(blob_id, headers).await
    }

    async fn delete(&self, blob_id: &BlobId, reason: &str) -> Result<bool, BlobStoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Backend("delete refused".to_string()));
        }
        self.inner.delete(blob_id, reason).await
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.delete_hard(blob_id).await
    }

    async fn undelete(
        &self,
        checker: Option<&dyn BlobInUseChecker>,
        blob_id: &BlobId,
    ) -> Result<bool, BlobStoreError> {
        self.inner.undelete(checker, blob_id).await
    }

    async fn exists(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(blob_id).await
    }

    async fn is_empty(&self) -> Result<bool, BlobStoreError> {
        self.inner.is_empty().await
    }

    fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    async fn compact(&self, checker: Option<&dyn BlobInUseChecker>) -> Result<(), BlobStoreError> {
        self.inner.compact(checker).await
    }

    async fn metrics(&self) -> Result<StoreMetrics, BlobStoreError> {
        self.inner.metrics().await
    }

    fn configuration(&self) -> StoreConfiguration {
        self.inner.configuration()
    }
}

/// Build an initialized (not started) group over `stores`, in that order.
pub fn group_of(stores: &[Arc<CountingStore>], strategy: &str) -> (GroupStore, Arc<StoreManager>) {
    let manager = Arc::new(StoreManager::new());
    for store in stores {
        manager.register(Arc::clone(store) as Arc<dyn BlobStore>);
    }
    let names = stores.iter().map(|s| s.name()).collect();
    let config = GroupConfiguration::new("test-group", names).with_strategy(strategy);
    let group = GroupStore::init(
        config,
        Arc::clone(&manager) as Arc<dyn crate::registry::StoreRegistry>,
        &StrategyRegistry::with_builtins(),
        Arc::new(CacheManager::new()),
    )
    .expect("group init");
    (group, manager)
}
