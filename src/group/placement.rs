use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::blob_store::{BlobStoreError, Headers};

use super::Member;

pub const WRITE_TO_FIRST: &str = "write-to-first";
pub const ROUND_ROBIN: &str = "round-robin";

/// Strategy used when the configured name is not registered.
pub const DEFAULT_STRATEGY: &str = WRITE_TO_FIRST;

/// Chooses which member receives a new or copied blob.
pub trait PlacementStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn choose_for_create(&self, members: &[Member], headers: &Headers) -> Option<Member>;

    /// Defaults to the source member when it can take writes.
    fn choose_for_copy(
        &self,
        members: &[Member],
        source: &Member,
        headers: &Headers,
    ) -> Option<Member> {
        if source.is_writable() {
            Some(source.clone())
        } else {
            self.choose_for_create(members, headers)
        }
    }

    /// Check the group can be served by this strategy. Called on start.
    fn validate(&self, _members: &[Member]) -> Result<(), BlobStoreError> {
        Ok(())
    }
}

/// Always the first writable member in configured order.
#[derive(Debug, Default)]
pub struct WriteToFirst;

impl PlacementStrategy for WriteToFirst {
    fn name(&self) -> &str {
        WRITE_TO_FIRST
    }

    fn choose_for_create(&self, members: &[Member], _headers: &Headers) -> Option<Member> {
        members.iter().find(|m| m.is_writable()).cloned()
    }
}

/// Cycles through writable members.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl PlacementStrategy for RoundRobin {
    fn name(&self) -> &str {
        ROUND_ROBIN
    }

    fn choose_for_create(&self, members: &[Member], _headers: &Headers) -> Option<Member> {
        let writable: Vec<&Member> = members.iter().filter(|m| m.is_writable()).collect();
        if writable.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % writable.len();
        Some(writable[index].clone())
    }

    fn validate(&self, members: &[Member]) -> Result<(), BlobStoreError> {
        if !members.iter().any(Member::is_writable) {
            return Err(BlobStoreError::Configuration(format!(
                "{ROUND_ROBIN} requires at least one writable member"
            )));
        }
        Ok(())
    }
}

/// Placement strategies available by name.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn PlacementStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WriteToFirst));
        registry.register(Arc::new(RoundRobin::default()));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn PlacementStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PlacementStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Look up `name`, falling back to [`DEFAULT_STRATEGY`] with a warning.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn PlacementStrategy>, BlobStoreError> {
        if let Some(strategy) = self.get(name) {
            return Ok(strategy);
        }
        let fallback = self.get(DEFAULT_STRATEGY).ok_or_else(|| {
            BlobStoreError::Configuration(format!(
                "unknown placement strategy '{name}' and no '{DEFAULT_STRATEGY}' fallback registered"
            ))
        })?;
        tracing::warn!(
            requested = name,
            fallback = DEFAULT_STRATEGY,
            "Unknown placement strategy, using default"
        );
        Ok(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryStore;

    fn members() -> Vec<Member> {
        vec![
            Member::new("legacy", Arc::new(MemoryStore::read_only("legacy"))),
            Member::new("a", Arc::new(MemoryStore::new("a"))),
            Member::new("b", Arc::new(MemoryStore::new("b"))),
        ]
    }

    #[test]
    fn test_write_to_first_skips_read_only() {
        let chosen = WriteToFirst.choose_for_create(&members(), &Headers::new());
        assert_eq!(chosen.unwrap().name(), "a");
    }

    #[test]
    fn test_round_robin_cycles_writable_members() {
        let strategy = RoundRobin::default();
        let members = members();
        let names: Vec<String> = (0..4)
            .map(|_| {
                strategy
                    .choose_for_create(&members, &Headers::new())
                    .unwrap()
                    .name()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_no_writable_member() {
        let members = vec![Member::new(
            "legacy",
            Arc::new(MemoryStore::read_only("legacy")),
        )];
        assert!(WriteToFirst
            .choose_for_create(&members, &Headers::new())
            .is_none());
        assert!(RoundRobin::default().validate(&members).is_err());
        assert!(WriteToFirst.validate(&members).is_ok());
    }

    #[test]
    fn test_copy_prefers_writable_source() {
        let members = members();
        let chosen = WriteToFirst.choose_for_copy(&members, &members[2], &Headers::new());
        assert_eq!(chosen.unwrap().name(), "b");

        let chosen = WriteToFirst.choose_for_copy(&members, &members[0], &Headers::new());
        assert_eq!(chosen.unwrap().name(), "a");
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_default() {
        let registry = StrategyRegistry::with_builtins();
        assert_eq!(registry.resolve(ROUND_ROBIN).unwrap().name(), ROUND_ROBIN);
        assert_eq!(registry.resolve("fill-random").unwrap().name(), WRITE_TO_FIRST);
    }

    #[test]
    fn test_unknown_strategy_without_default_fails() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(RoundRobin::default()));
        assert!(matches!(
            registry.resolve("fill-random"),
            Err(BlobStoreError::Configuration(_))
        ));
    }
}
