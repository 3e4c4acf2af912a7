use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

use crate::group::location_cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::group::placement::DEFAULT_STRATEGY;
use crate::group::GroupConfiguration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub group: GroupSettings,
    pub stores: Vec<StoreSpec>,
    /// Enables maintenance routes like compaction. Must never be true in production.
    pub test_mode: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone)]
pub struct GroupSettings {
    pub name: String,
    /// Member store names in lookup order. Defaults to every configured store.
    pub members: Vec<String>,
    pub strategy: String,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
}

/// A local backing store, parsed from `name=path[:ro]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub name: String,
    pub path: String,
    pub read_only: bool,
}

impl StoreSpec {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (name, location) = raw.split_once('=').ok_or_else(|| {
            ConfigError::ValidationError(format!("store '{raw}' must look like name=path[:ro]"))
        })?;
        let (path, read_only) = match location.strip_suffix(":ro") {
            Some(path) => (path, true),
            None => (location, false),
        };
        Ok(Self {
            name: name.trim().to_string(),
            path: path.trim().to_string(),
            read_only,
        })
    }
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            members: Vec::new(),
            strategy: DEFAULT_STRATEGY.to_string(),
            cache_ttl_seconds: DEFAULT_TTL.as_secs(),
            cache_max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, test fixtures).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let stores = split_list(&lookup("STORES").unwrap_or_else(|| "default=./blobs".to_string()))
            .iter()
            .map(|raw| StoreSpec::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let members = lookup("GROUP_MEMBERS")
            .map(|raw| split_list(&raw))
            .filter(|members| !members.is_empty())
            .unwrap_or_else(|| stores.iter().map(|s| s.name.clone()).collect());

        let defaults = GroupSettings::default();
        let group = GroupSettings {
            name: lookup("GROUP_NAME").unwrap_or(defaults.name),
            members,
            strategy: lookup("PLACEMENT_STRATEGY").unwrap_or(defaults.strategy),
            cache_ttl_seconds: lookup("LOCATION_CACHE_TTL_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_ttl_seconds),
            cache_max_entries: lookup("LOCATION_CACHE_MAX_ENTRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_max_entries),
        };

        let test_mode = lookup("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_upload_size = lookup("MAX_UPLOAD_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let config = Config {
            node: NodeConfig { bind_address },
            group,
            stores,
            test_mode,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stores.is_empty() {
            return Err(ConfigError::ValidationError(
                "STORES must name at least one store".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for store in &self.stores {
            if store.name.is_empty() || store.path.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "store '{}={}' needs both a name and a path",
                    store.name, store.path
                )));
            }
            if !names.insert(store.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "store name '{}' is configured twice",
                    store.name
                )));
            }
        }

        for member in &self.group.members {
            if !names.contains(member.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "GROUP_MEMBERS names unknown store '{member}'"
                )));
            }
        }

        if self.group.cache_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "LOCATION_CACHE_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.stores.iter().all(|s| s.read_only) {
            tracing::warn!("Every configured store is read-only. New blobs cannot be created.");
        }

        Ok(())
    }

    /// The group store configuration described by this config.
    pub fn group_configuration(&self) -> GroupConfiguration {
        GroupConfiguration {
            name: self.group.name.clone(),
            members: self.group.members.clone(),
            strategy: self.group.strategy.clone(),
            cache_ttl: Duration::from_secs(self.group.cache_ttl_seconds),
            cache_max_entries: self.group.cache_max_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.node.bind_address, "0.0.0.0:8080");
        assert_eq!(
            config.stores,
            vec![StoreSpec {
                name: "default".to_string(),
                path: "./blobs".to_string(),
                read_only: false,
            }]
        );
        assert_eq!(config.group.members, vec!["default".to_string()]);
        assert_eq!(config.group.strategy, "write-to-first");

        let group = config.group_configuration();
        assert_eq!(group.cache_ttl, Duration::from_secs(2 * 24 * 60 * 60));
    }

    #[test]
    fn test_stores_and_members() {
        let config = load(&[
            ("STORES", "fast=/data/fast, legacy=/data/old:ro"),
            ("GROUP_MEMBERS", "legacy,fast"),
            ("PLACEMENT_STRATEGY", "round-robin"),
            ("LOCATION_CACHE_TTL_SECONDS", "60"),
        ])
        .unwrap();

        assert_eq!(config.stores.len(), 2);
        assert!(config.stores[1].read_only);
        assert_eq!(config.stores[1].path, "/data/old");
        assert_eq!(config.group.members, vec!["legacy", "fast"]);

        let group = config.group_configuration();
        assert_eq!(group.strategy, "round-robin");
        assert_eq!(group.cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_member_rejected() {
        let result = load(&[("STORES", "a=/a"), ("GROUP_MEMBERS", "a,b")]);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let result = load(&[("STORES", "a=/a,a=/b")]);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_malformed_store_rejected() {
        assert!(load(&[("STORES", "just-a-path")]).is_err());
        assert!(load(&[("STORES", "=/path")]).is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        assert!(load(&[("LOCATION_CACHE_TTL_SECONDS", "0")]).is_err());
    }
}
