//! Group store: presents several backing stores as one.
//!
//! New blobs go where the placement strategy says. Existing blobs are found
//! through the location cache when possible and otherwise by scanning
//! members, writable ones first. Every operation runs under the group's
//! lifecycle guard.

pub mod location_cache;
pub mod placement;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};

use crate::blob_store::{
    Blob, BlobId, BlobInUseChecker, BlobStore, BlobStoreError, Headers, StorageErrorKind,
    StoreConfiguration, StoreMetrics,
};
use crate::lifecycle::{lifecycle_guard, Lifecycle, LifecycleState, Operation};
use crate::registry::StoreRegistry;
use crate::state_guard::StateGuard;

use location_cache::{CacheManager, LocationCache, CACHE_NAME, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use placement::{PlacementStrategy, StrategyRegistry, DEFAULT_STRATEGY};

/// A resolved group member.
#[derive(Clone)]
pub struct Member {
    name: String,
    store: Arc<dyn BlobStore>,
}

impl Member {
    pub fn new(name: impl Into<String>, store: Arc<dyn BlobStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn is_writable(&self) -> bool {
        self.store.is_writable()
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("writable", &self.is_writable())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupConfiguration {
    pub name: String,
    /// Member store names, in configured order.
    pub members: Vec<String>,
    pub strategy: String,
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
}

impl GroupConfiguration {
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members,
            strategy: DEFAULT_STRATEGY.to_string(),
            cache_ttl: DEFAULT_TTL,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Location caches are namespaced per group.
    fn cache_name(&self) -> String {
        format!("{CACHE_NAME}:{}", self.name)
    }
}

pub struct GroupStore {
    config: GroupConfiguration,
    guard: StateGuard<LifecycleState>,
    registry: Arc<dyn StoreRegistry>,
    caches: Arc<CacheManager>,
    strategy: Arc<dyn PlacementStrategy>,
    members: OnceCell<Vec<Member>>,
    location_cache: RwLock<Option<LocationCache>>,
    compaction: Mutex<()>,
}

impl GroupStore {
    /// Record the configuration and resolve the placement strategy. Members are
    /// resolved lazily, once, on first use.
    pub fn init(
        config: GroupConfiguration,
        registry: Arc<dyn StoreRegistry>,
        strategies: &StrategyRegistry,
        caches: Arc<CacheManager>,
    ) -> Result<Self, BlobStoreError> {
        if config.members.is_empty() {
            return Err(BlobStoreError::Configuration(format!(
                "group '{}' has no members",
                config.name
            )));
        }
        let strategy = strategies.resolve(&config.strategy)?;
        let guard = lifecycle_guard(format!("group:{}", config.name));

        tracing::debug!(
            group = %config.name,
            members = ?config.members,
            strategy = strategy.name(),
            "Initialized group store"
        );

        Ok(Self {
            config,
            guard,
            registry,
            caches,
            strategy,
            members: OnceCell::new(),
            location_cache: RwLock::new(None),
            compaction: Mutex::new(()),
        })
    }

    pub fn group_configuration(&self) -> &GroupConfiguration {
        &self.config
    }

    pub fn strategy(&self) -> &Arc<dyn PlacementStrategy> {
        &self.strategy
    }

    /// Resolved members in configured order.
    pub async fn members(&self) -> Result<&[Member], BlobStoreError> {
        let members = self
            .members
            .get_or_try_init(|| async { self.resolve_members() })
            .await?;
        Ok(members.as_slice())
    }

    fn resolve_members(&self) -> Result<Vec<Member>, BlobStoreError> {
        self.config
            .members
            .iter()
            .map(|name| {
                let store = self.registry.resolve(name).ok_or_else(|| {
                    BlobStoreError::Configuration(format!(
                        "group '{}' member '{name}' is not a known store",
                        self.config.name
                    ))
                })?;
                tracing::debug!(group = %self.config.name, member = %name, "Resolved group member");
                Ok(Member::new(name.clone(), store))
            })
            .collect()
    }

    fn location_cache(&self) -> Option<LocationCache> {
        self.location_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn remember(&self, blob_id: &BlobId, member: &Member) {
        if let Some(cache) = self.location_cache() {
            cache.insert(blob_id.clone(), member.name()).await;
        }
    }

    /// Find the member holding `blob_id`.
    ///
    /// Cache hits are trusted without an `exists` call; a cached name that no
    /// longer resolves counts as not found. On a miss members are searched
    /// writable-first, and only a writable hit is cached.
    pub async fn locate(&self, blob_id: &BlobId) -> Result<Option<Member>, BlobStoreError> {
        let cache = self.location_cache();

        if let Some(cache) = &cache {
            if let Some(name) = cache.get(blob_id).await {
                return Ok(self
                    .registry
                    .resolve(&name)
                    .map(|store| Member::new(name, store)));
            }
        }

        let mut ordered: Vec<&Member> = self.members().await?.iter().collect();
        ordered.sort_by_key(|member| !member.is_writable());

        for member in ordered {
            if !member.store.exists(blob_id).await? {
                continue;
            }
            if member.is_writable() {
                if let Some(cache) = &cache {
                    cache.insert(blob_id.clone(), member.name()).await;
                }
            }
            return Ok(Some(member.clone()));
        }
        Ok(None)
    }

    /// No-op removal hook; only valid while the group is not running.
    pub async fn remove(&self) -> Result<(), BlobStoreError> {
        self.guard
            .intercept(Operation::Remove.requirement(), || async { Ok(()) })
            .await
    }

    async fn delete_everywhere(
        &self,
        blob_id: &BlobId,
        reason: Option<&str>,
    ) -> Result<bool, BlobStoreError> {
        if let Some(cache) = self.location_cache() {
            cache.invalidate(blob_id).await;
        }

        let mut holders = Vec::new();
        for member in self.members().await? {
            if member.store.exists(blob_id).await? {
                holders.push(member);
            }
        }
        if holders.is_empty() {
            return Ok(false);
        }

        let mut deleted_all = true;
        for member in holders {
            let result = match reason {
                Some(reason) => member.store.delete(blob_id, reason).await,
                None => member.store.delete_hard(blob_id).await,
            };
            match result {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(blob_id = %blob_id, member = %member.name, "Member did not delete blob");
                    deleted_all = false;
                }
                Err(e) => {
                    tracing::warn!(blob_id = %blob_id, member = %member.name, error = %e, "Failed to delete blob from member");
                    deleted_all = false;
                }
            }
        }
        Ok(deleted_all)
    }
}

#[async_trait]
impl Lifecycle for GroupStore {
    async fn start(&self) -> Result<(), BlobStoreError> {
        self.guard
            .intercept(Operation::Start.requirement(), || async {
                let members = self.members().await?;
                self.strategy.validate(members)?;

                let cache = self.caches.location_cache(
                    &self.config.cache_name(),
                    self.config.cache_ttl,
                    self.config.cache_max_entries,
                );
                *self
                    .location_cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(cache);

                tracing::info!(
                    group = %self.config.name,
                    members = members.len(),
                    strategy = self.strategy.name(),
                    "Group store started"
                );
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<(), BlobStoreError> {
        self.guard
            .intercept(Operation::Stop.requirement(), || async {
                self.location_cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                self.caches.destroy(&self.config.cache_name());
                tracing::info!(group = %self.config.name, "Group store stopped");
                Ok(())
            })
            .await
    }

    async fn state(&self) -> LifecycleState {
        self.guard.current().await
    }
}

#[async_trait]
impl BlobStore for GroupStore {
    async fn create(
        &self,
        data: Bytes,
        headers: Headers,
        blob_id: Option<BlobId>,
    ) -> Result<Blob, BlobStoreError> {
        self.guard
            .intercept(Operation::Create.requirement(), || async move {
                let members = self.members().await?;
                let member = self
                    .strategy
                    .choose_for_create(members, &headers)
                    .ok_or_else(|| {
                        BlobStoreError::storage(
                            StorageErrorKind::NoEligibleMember,
                            blob_id.as_ref(),
                            format!("no eligible member in group '{}'", self.config.name),
                        )
                    })?;

                let blob = member.store.create(data, headers, blob_id).await?;
                self.remember(&blob.id, &member).await;
                tracing::debug!(group = %self.config.name, blob_id = %blob.id, member = %member.name, "Created blob");
                Ok(blob)
            })
            .await
    }

    async fn get(
        &self,
        blob_id: &BlobId,
        include_deleted: bool,
    ) -> Result<Option<Blob>, BlobStoreError> {
        self.guard
            .intercept(Operation::Get.requirement(), || async {
                if include_deleted {
                    // The cache knows nothing about deleted blobs; ask every member.
                    for member in self.members().await? {
                        if let Some(blob) = member.store.get(blob_id, true).await? {
                            return Ok(Some(blob));
                        }
                    }
                    return Ok(None);
                }

                match self.locate(blob_id).await? {
                    Some(member) => member.store.get(blob_id, false).await,
                    None => Ok(None),
                }
            })
            .await
    }

    async fn copy(&self, blob_id: &BlobId, headers: Headers) -> Result<Blob, BlobStoreError> {
        self.guard
            .intercept(Operation::Copy.requirement(), || async move {
                let member = self.locate(blob_id).await?.ok_or_else(|| {
                    BlobStoreError::storage(
                        StorageErrorKind::BlobNotFound,
                        Some(blob_id),
                        "blob not found in any member",
                    )
                })?;
                let blob = member.store.copy(blob_id, headers).await?;
                self.remember(&blob.id, &member).await;
                tracing::debug!(
                    group = %self.config.name,
                    source = %blob_id,
                    blob_id = %blob.id,
                    member = %member.name,
                    "Copied blob"
                );
                Ok(blob)
            })
            .await
    }

    async fn delete(&self, blob_id: &BlobId, reason: &str) -> Result<bool, BlobStoreError> {
        self.guard
            .intercept(Operation::Delete.requirement(), || {
                self.delete_everywhere(blob_id, Some(reason))
            })
            .await
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        self.guard
            .intercept(Operation::DeleteHard.requirement(), || {
                self.delete_everywhere(blob_id, None)
            })
            .await
    }

    async fn undelete(
        &self,
        checker: Option<&dyn BlobInUseChecker>,
        blob_id: &BlobId,
    ) -> Result<bool, BlobStoreError> {
        self.guard
            .intercept(Operation::Undelete.requirement(), || async {
                // Read-only members cannot undelete anything.
                for member in self.members().await?.iter().filter(|m| m.is_writable()) {
                    if member.store.undelete(checker, blob_id).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
            .await
    }

    async fn exists(&self, blob_id: &BlobId) -> Result<bool, BlobStoreError> {
        self.guard
            .intercept(Operation::Exists.requirement(), || async {
                for member in self.members().await? {
                    if member.store.exists(blob_id).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
            .await
    }

    async fn is_empty(&self) -> Result<bool, BlobStoreError> {
        self.guard
            .intercept(Operation::IsEmpty.requirement(), || async {
                let mut empty = true;
                for member in self.members().await? {
                    empty &= member.store.is_empty().await?;
                }
                Ok(empty)
            })
            .await
    }

    /// Before the member list is resolved, configured names are looked up
    /// in the registry without memoizing the result.
    fn is_writable(&self) -> bool {
        match self.members.get() {
            Some(members) => members.iter().any(Member::is_writable),
            None => self
                .config
                .members
                .iter()
                .filter_map(|name| self.registry.resolve(name))
                .any(|store| store.is_writable()),
        }
    }

    async fn compact(&self, checker: Option<&dyn BlobInUseChecker>) -> Result<(), BlobStoreError> {
        self.guard
            .intercept(Operation::Compact.requirement(), || async {
                let _running = self.compaction.lock().await;
                for member in self.members().await? {
                    tracing::info!(group = %self.config.name, member = %member.name, "Compacting member");
                    member.store.compact(checker).await?;
                }
                Ok(())
            })
            .await
    }

    async fn metrics(&self) -> Result<StoreMetrics, BlobStoreError> {
        self.guard
            .intercept(Operation::Metrics.requirement(), || async {
                let mut total = StoreMetrics::default();
                for member in self.members().await? {
                    total = total.merge(member.store.metrics().await?);
                }
                Ok(total)
            })
            .await
    }

    fn configuration(&self) -> StoreConfiguration {
        StoreConfiguration {
            name: self.config.name.clone(),
            store_type: "group".to_string(),
            attributes: HashMap::from([
                (
                    "members".to_string(),
                    serde_json::Value::from(self.config.members.clone()),
                ),
                (
                    "strategy".to_string(),
                    serde_json::Value::from(self.strategy.name()),
                ),
            ]),
        }
    }

    fn name(&self) -> String {
        self.config.name.clone()
    }
}
