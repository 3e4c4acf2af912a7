use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::blob_store::{
    Blob, BlobId, BlobInUseChecker, BlobStore, BlobStoreError, Headers, StoreConfiguration,
    StoreMetrics,
};
use crate::lifecycle::{lifecycle_guard, Lifecycle, LifecycleState, Operation};

use super::StateGuard;

/// Gives an existing store a lifecycle. Every call is checked against the
/// requirement the wrapped store declares for that operation before it is
/// forwarded.
pub struct GuardedStore {
    inner: Arc<dyn BlobStore>,
    guard: StateGuard<LifecycleState>,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        let guard = lifecycle_guard(format!("store:{}", inner.name()));
        Self { inner, guard }
    }

    pub fn inner(&self) -> &Arc<dyn BlobStore> {
        &self.inner
    }
}

#[async_trait]
impl Lifecycle for GuardedStore {
    async fn start(&self) -> Result<(), BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Start);
        self.guard.intercept(requirement, || async { Ok(()) }).await
    }

    async fn stop(&self) -> Result<(), BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Stop);
        self.guard.intercept(requirement, || async { Ok(()) }).await
    }

    async fn state(&self) -> LifecycleState {
        self.guard.current().await
    }
}

#[async_trait]
impl BlobStore for GuardedStore {
    async fn create(
        &self,
        data: Bytes,
        headers: Headers,
        blob_id: Option<BlobId>,
    ) -> Result<Blob, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Create);
        self.guard
            .intercept(requirement, || self.inner.create(data, headers, blob_id))
            .await
    }

    async fn get(
        &self,
        blob_id: &BlobId,
        include_deleted: bool,
    ) -> Result<Option<Blob>, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Get);
        self.guard
            .intercept(requirement, || self.inner.get(blob_id, include_deleted))
            .await
    }

    async fn copy(&self, blob_id: &BlobId, headers: Headers) -> Result<Blob, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Copy);
        self.guard
            .intercept(requirement, || self.inner.copy(blob_id, headers))
            .await
    }

    async fn delete(&self, blob_id: &BlobId, reason: &str) -> Result<bool, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Delete);
        self.guard
            .intercept(requirement, || self.inner.delete(blob_id, reason))
            .await
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::DeleteHard);
        self.guard
            .intercept(requirement, || self.inner.delete_hard(blob_id))
            .await
    }

    async fn undelete(
        &self,
        checker: Option<&dyn BlobInUseChecker>,
        blob_id: &BlobId,
    ) -> Result<bool, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Undelete);
        self.guard
            .intercept(requirement, || self.inner.undelete(checker, blob_id))
            .await
    }

    async fn exists(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Exists);
        self.guard
            .intercept(requirement, || self.inner.exists(blob_id))
            .await
    }

    async fn is_empty(&self) -> Result<bool, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::IsEmpty);
        self.guard
            .intercept(requirement, || self.inner.is_empty())
            .await
    }

    fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    async fn compact(&self, checker: Option<&dyn BlobInUseChecker>) -> Result<(), BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Compact);
        self.guard
            .intercept(requirement, || self.inner.compact(checker))
            .await
    }

    async fn metrics(&self) -> Result<StoreMetrics, BlobStoreError> {
        let requirement = self.inner.requirement(Operation::Metrics);
        self.guard
            .intercept(requirement, || self.inner.metrics())
            .await
    }

    fn configuration(&self) -> StoreConfiguration {
        self.inner.configuration()
    }

    fn name(&self) -> String {
        self.inner.name()
    }
}
