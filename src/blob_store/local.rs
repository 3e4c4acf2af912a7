use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{
    merge_headers, validate_blob_id, Blob, BlobId, BlobInUseChecker, BlobStore, BlobStoreError,
    Headers, StoreConfiguration, StoreMetrics,
};

const BYTES_EXT: &str = "bytes";
const ATTRS_EXT: &str = "attrs";

/// Filesystem blob store. Each blob is a `<id>.bytes` content file plus a
/// `<id>.attrs` msgpack sidecar holding headers and soft-delete state.
pub struct LocalStore {
    name: String,
    base_path: PathBuf,
    writable: bool,
}

/// Sidecar attributes persisted next to the content file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobAttributes {
    headers: Headers,
    created_at: DateTime<Utc>,
    size: u64,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    deleted_reason: Option<String>,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(name: &str, base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            name: name.to_string(),
            base_path,
            writable: true,
        })
    }

    /// Open an existing directory as a read-only (legacy) store.
    pub fn read_only<P: AsRef<Path>>(name: &str, base_path: P) -> Result<Self, std::io::Error> {
        Ok(Self {
            writable: false,
            ..Self::new(name, base_path)?
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn content_path(&self, blob_id: &BlobId) -> PathBuf {
        self.base_path.join(format!("{blob_id}.{BYTES_EXT}"))
    }

    fn attrs_path(&self, blob_id: &BlobId) -> PathBuf {
        self.base_path.join(format!("{blob_id}.{ATTRS_EXT}"))
    }

    fn ensure_writable(&self) -> Result<(), BlobStoreError> {
        if !self.writable {
            return Err(BlobStoreError::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    async fn read_attrs(&self, blob_id: &BlobId) -> Result<Option<BlobAttributes>, BlobStoreError> {
        validate_blob_id(blob_id)?;
        let path = self.attrs_path(blob_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read(&path).await?;
        Ok(Some(rmp_serde::from_slice(&raw)?))
    }

    async fn write_attrs(
        &self,
        blob_id: &BlobId,
        attrs: &BlobAttributes,
    ) -> Result<(), BlobStoreError> {
        let raw = rmp_serde::to_vec_named(attrs)?;
        tokio::fs::write(self.attrs_path(blob_id), raw).await?;
        Ok(())
    }

    async fn remove_files(&self, blob_id: &BlobId) -> Result<(), BlobStoreError> {
        for path in [self.content_path(blob_id), self.attrs_path(blob_id)] {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Ids of every blob with a sidecar in the store directory.
    async fn blob_ids(&self) -> Result<Vec<BlobId>, BlobStoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ATTRS_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(BlobId::from(stem));
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn create(
        &self,
        data: Bytes,
        headers: Headers,
        blob_id: Option<BlobId>,
    ) -> Result<Blob, BlobStoreError> {
        self.ensure_writable()?;
        let id = blob_id.unwrap_or_else(BlobId::random);
        validate_blob_id(&id)?;

        let attrs = BlobAttributes {
            headers,
            created_at: Utc::now(),
            size: data.len() as u64,
            deleted: false,
            deleted_reason: None,
        };
        // Content first so a visible sidecar always has bytes behind it.
        tokio::fs::write(self.content_path(&id), &data).await?;
        self.write_attrs(&id, &attrs).await?;

        tracing::debug!(store = %self.name, blob_id = %id, size = attrs.size, "Created blob");

        Ok(Blob {
            id,
            data,
            headers: attrs.headers,
            created_at: attrs.created_at,
            deleted: false,
            deleted_reason: None,
        })
    }

    async fn get(
        &self,
        blob_id: &BlobId,
        include_deleted: bool,
    ) -> Result<Option<Blob>, BlobStoreError> {
        let Some(attrs) = self.read_attrs(blob_id).await? else {
            return Ok(None);
        };
        if attrs.deleted && !include_deleted {
            return Ok(None);
        }
        let path = self.content_path(blob_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Some(Blob {
            id: blob_id.clone(),
            data: Bytes::from(data),
            headers: attrs.headers,
            created_at: attrs.created_at,
            deleted: attrs.deleted,
            deleted_reason: attrs.deleted_reason,
        }))
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
        let Some(mut attrs) = self.read_attrs(blob_id).await? else {
            return Ok(false);
        };
        if attrs.deleted {
            return Ok(false);
        }
        attrs.deleted = true;
        attrs.deleted_reason = Some(reason.to_string());
        self.write_attrs(blob_id, &attrs).await?;
        tracing::debug!(store = %self.name, blob_id = %blob_id, reason, "Soft-deleted blob");
        Ok(true)
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        self.ensure_writable()?;
        validate_blob_id(blob_id)?;
        let existed = self.attrs_path(blob_id).exists() || self.content_path(blob_id).exists();
        self.remove_files(blob_id).await?;
        Ok(existed)
    }

    async fn undelete(
        &self,
        checker: Option<&dyn BlobInUseChecker>,
        blob_id: &BlobId,
    ) -> Result<bool, BlobStoreError> {
        self.ensure_writable()?;
        let Some(mut attrs) = self.read_attrs(blob_id).await? else {
            return Ok(false);
        };
        if !attrs.deleted || checker.is_some_and(|c| !c.is_in_use(blob_id)) {
            return Ok(false);
        }
        attrs.deleted = false;
        attrs.deleted_reason = None;
        self.write_attrs(blob_id, &attrs).await?;
        Ok(true)
    }

    async fn exists(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        Ok(self
            .read_attrs(blob_id)
            .await?
            .is_some_and(|attrs| !attrs.deleted))
    }

    async fn is_empty(&self) -> Result<bool, BlobStoreError> {
        Ok(self.blob_ids().await?.is_empty())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn compact(&self, checker: Option<&dyn BlobInUseChecker>) -> Result<(), BlobStoreError> {
        // Nothing here was soft-deleted through this store.
        if !self.writable {
            return Ok(());
        }
        let mut removed = 0u64;
        for id in self.blob_ids().await? {
            let Some(attrs) = self.read_attrs(&id).await? else {
                continue;
            };
            if !attrs.deleted || checker.is_some_and(|c| c.is_in_use(&id)) {
                continue;
            }
            self.remove_files(&id).await?;
            removed += 1;
        }
        tracing::info!(store = %self.name, removed, "Compacted local store");
        Ok(())
    }

    async fn metrics(&self) -> Result<StoreMetrics, BlobStoreError> {
        let mut metrics = StoreMetrics::default();
        for id in self.blob_ids().await? {
            let Some(attrs) = self.read_attrs(&id).await? else {
                continue;
            };
            if attrs.deleted {
                metrics.deleted_count += 1;
            } else {
                metrics.blob_count += 1;
            }
            metrics.total_size += attrs.size;
        }
        Ok(metrics)
    }

    fn configuration(&self) -> StoreConfiguration {
        StoreConfiguration {
            name: self.name.clone(),
            store_type: "file".to_string(),
            attributes: HashMap::from([
                (
                    "path".to_string(),
                    serde_json::Value::String(self.base_path.to_string_lossy().to_string()),
                ),
                (
                    "writable".to_string(),
                    serde_json::Value::Bool(self.writable),
                ),
            ]),
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
