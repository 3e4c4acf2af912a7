use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    merge_headers, Blob, BlobId, BlobInUseChecker, BlobStore, BlobStoreError, Headers,
    StoreConfiguration, StoreMetrics,
};

/// In-memory blob store, for tests and ephemeral members.
pub struct MemoryStore {
    name: String,
    writable: bool,
    blobs: RwLock<HashMap<BlobId, Blob>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writable: true,
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            writable: false,
            ..Self::new(name)
        }
    }

    /// Place a blob directly, bypassing the read-only check. Used to seed legacy members.
    pub async fn seed(&self, blob_id: BlobId, data: Bytes, headers: Headers) {
        let blob = Blob {
            id: blob_id.clone(),
            data,
            headers,
            created_at: Utc::now(),
            deleted: false,
            deleted_reason: None,
        };
        self.blobs.write().await.insert(blob_id, blob);
    }

    fn ensure_writable(&self) -> Result<(), BlobStoreError> {
        if !self.writable {
            return Err(BlobStoreError::ReadOnly(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn create(
        &self,
        data: Bytes,
        headers: Headers,
        blob_id: Option<BlobId>,
    ) -> Result<Blob, BlobStoreError> {
        self.ensure_writable()?;
        let id = blob_id.unwrap_or_else(BlobId::random);
        let blob = Blob {
            id: id.clone(),
            data,
            headers,
            created_at: Utc::now(),
            deleted: false,
            deleted_reason: None,
        };
        self.blobs.write().await.insert(id, blob.clone());
        Ok(blob)
    }

    async fn get(
        &self,
        blob_id: &BlobId,
        include_deleted: bool,
    ) -> Result<Option<Blob>, BlobStoreError> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .get(blob_id)
            .filter(|blob| include_deleted || !blob.deleted)
            .cloned())
    }

    async fn copy(&self, blob_id: &BlobId, headers: Headers) -> Result<Blob, BlobStoreError> {
        self.ensure_writable()?;
        let source = self
            .get(blob_id, false)
            .await?
            .ok_or_else(|| BlobStoreError::NotFound(blob_id.clone()))?;
        let headers = merge_headers(&source.headers, headers);
        self.create(source.data, headers, None).await
    }

    async fn delete(&self, blob_id: &BlobId, reason: &str) -> Result<bool, BlobStoreError> {
        self.ensure_writable()?;
        let mut blobs = self.blobs.write().await;
        match blobs.get_mut(blob_id) {
            Some(blob) if !blob.deleted => {
                blob.deleted = true;
                blob.deleted_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        self.ensure_writable()?;
        Ok(self.blobs.write().await.remove(blob_id).is_some())
    }

    async fn undelete(
        &self,
        checker: Option<&dyn BlobInUseChecker>,
        blob_id: &BlobId,
    ) -> Result<bool, BlobStoreError> {
        self.ensure_writable()?;
        let mut blobs = self.blobs.write().await;
        match blobs.get_mut(blob_id) {
            Some(blob) if blob.deleted => {
                if checker.is_some_and(|c| !c.is_in_use(blob_id)) {
                    return Ok(false);
                }
                blob.deleted = false;
                blob.deleted_reason = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        let blobs = self.blobs.read().await;
        Ok(blobs.get(blob_id).is_some_and(|blob| !blob.deleted))
    }

    async fn is_empty(&self) -> Result<bool, BlobStoreError> {
        Ok(self.blobs.read().await.is_empty())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn compact(&self, checker: Option<&dyn BlobInUseChecker>) -> Result<(), BlobStoreError> {
        // Nothing here was soft-deleted through this store.
        if !self.writable {
            return Ok(());
        }
        let mut blobs = self.blobs.write().await;
        blobs.retain(|id, blob| !blob.deleted || checker.is_some_and(|c| c.is_in_use(id)));
        Ok(())
    }

    async fn metrics(&self) -> Result<StoreMetrics, BlobStoreError> {
        let blobs = self.blobs.read().await;
        let mut metrics = StoreMetrics::default();
        for blob in blobs.values() {
            if blob.deleted {
                metrics.deleted_count += 1;
            } else {
                metrics.blob_count += 1;
            }
            metrics.total_size += blob.size();
        }
        Ok(metrics)
    }

    fn configuration(&self) -> StoreConfiguration {
        StoreConfiguration {
            name: self.name.clone(),
            store_type: "memory".to_string(),
            attributes: HashMap::from([(
                "writable".to_string(),
                serde_json::Value::Bool(self.writable),
            )]),
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
