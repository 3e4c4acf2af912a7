use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::blob_store::BlobStore;

/// Resolves configured store names to live store handles.
pub trait StoreRegistry: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn BlobStore>>;
}

/// Named stores known to this process.
#[derive(Default)]
pub struct StoreManager {
    stores: RwLock<HashMap<String, Arc<dyn BlobStore>>>,
}

impl StoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own name, replacing any previous holder of that name.
    pub fn register(&self, store: Arc<dyn BlobStore>) {
        let name = store.name();
        tracing::debug!(store = %name, "Registered blob store");
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, store);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn BlobStore>> {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl StoreRegistry for StoreManager {
    fn resolve(&self, name: &str) -> Option<Arc<dyn BlobStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
