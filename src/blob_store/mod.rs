mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::{Operation, Requirement};
use crate::state_guard::StateError;

/// Blob header metadata (content type, creator, etc.).
pub type Headers = HashMap<String, String>;

/// Opaque blob identifier. Produced by whichever store creates the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BlobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Why a per-call storage error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The placement strategy found no member able to take the write.
    NoEligibleMember,
    /// No member holds the blob.
    BlobNotFound,
    InvalidBlobId,
}

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Blob not found: {0}")]
    NotFound(BlobId),
    #[error("Store '{0}' is read-only")]
    ReadOnly(String),
    #[error("Storage error{}: {message}", .blob_id.as_ref().map(|id| format!(" for blob {id}")).unwrap_or_default())]
    Storage {
        kind: StorageErrorKind,
        blob_id: Option<BlobId>,
        message: String,
    },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

impl BlobStoreError {
    pub fn storage(
        kind: StorageErrorKind,
        blob_id: Option<&BlobId>,
        message: impl Into<String>,
    ) -> Self {
        BlobStoreError::Storage {
            kind,
            blob_id: blob_id.cloned(),
            message: message.into(),
        }
    }
}

impl From<rmp_serde::encode::Error> for BlobStoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BlobStoreError::Encoding(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BlobStoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BlobStoreError::Encoding(e.to_string())
    }
}

/// A blob as returned by a store: content plus the attributes recorded at creation.
#[derive(Debug, Clone)]
pub struct Blob {
    pub id: BlobId,
    pub data: Bytes,
    pub headers: Headers,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_reason: Option<String>,
}

impl Blob {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Aggregate counters for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub blob_count: u64,
    pub deleted_count: u64,
    pub total_size: u64,
    /// `None` means the store reports no space limit.
    pub available_space: Option<u64>,
}

impl StoreMetrics {
    /// Sum two sets of metrics. An unlimited side makes the result unlimited.
    pub fn merge(self, other: StoreMetrics) -> StoreMetrics {
        StoreMetrics {
            blob_count: self.blob_count + other.blob_count,
            deleted_count: self.deleted_count + other.deleted_count,
            total_size: self.total_size + other.total_size,
            available_space: match (self.available_space, other.available_space) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                _ => None,
            },
        }
    }
}

/// Name and descriptive attributes of a configured store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfiguration {
    pub name: String,
    pub store_type: String,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

/// Answers whether a soft-deleted blob is still referenced and must survive compaction.
pub trait BlobInUseChecker: Send + Sync {
    fn is_in_use(&self, blob_id: &BlobId) -> bool;
}

impl<F> BlobInUseChecker for F
where
    F: Fn(&BlobId) -> bool + Send + Sync,
{
    fn is_in_use(&self, blob_id: &BlobId) -> bool {
        self(blob_id)
    }
}

/// The store contract shared by backing stores and by the group router.
///
/// `get` returns `Ok(None)` for an unknown blob; soft-deleted blobs are only
/// returned when `include_deleted` is set. `exists` reports live blobs only.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create(
        &self,
        data: Bytes,
        headers: Headers,
        blob_id: Option<BlobId>,
    ) -> Result<Blob, BlobStoreError>;

    async fn get(&self, blob_id: &BlobId, include_deleted: bool)
        -> Result<Option<Blob>, BlobStoreError>;

    /// Copy an existing blob to a new id within the same store.
    async fn copy(&self, blob_id: &BlobId, headers: Headers) -> Result<Blob, BlobStoreError>;

    /// Soft delete. Returns false when the blob is not present.
    async fn delete(&self, blob_id: &BlobId, reason: &str) -> Result<bool, BlobStoreError>;

    async fn delete_hard(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError>;

    async fn undelete(
        &self,
        checker: Option<&dyn BlobInUseChecker>,
        blob_id: &BlobId,
    ) -> Result<bool, BlobStoreError>;

    async fn exists(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError>;

    async fn is_empty(&self) -> Result<bool, BlobStoreError>;

    fn is_writable(&self) -> bool;

    /// Permanently remove soft-deleted blobs the checker does not report in use.
    async fn compact(&self, checker: Option<&dyn BlobInUseChecker>) -> Result<(), BlobStoreError>;

    async fn metrics(&self) -> Result<StoreMetrics, BlobStoreError>;

    fn configuration(&self) -> StoreConfiguration;

    fn name(&self) -> String {
        self.configuration().name
    }

    /// Lifecycle requirement of each operation, read by `GuardedStore`.
    fn requirement(&self, op: Operation) -> Requirement {
        op.requirement()
    }
}

/// Merge a header overlay onto a copy of `base`.
pub(crate) fn merge_headers(base: &Headers, overlay: Headers) -> Headers {
    let mut merged = base.clone();
    merged.extend(overlay);
    merged
}

/// Reject ids that could escape a store's namespace.
pub(crate) fn validate_blob_id(blob_id: &BlobId) -> Result<(), BlobStoreError> {
    let id = blob_id.as_str();
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(BlobStoreError::storage(
            StorageErrorKind::InvalidBlobId,
            Some(blob_id),
            "invalid blob id",
        ));
    }
    Ok(())
}
