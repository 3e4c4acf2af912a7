//! blob-router - Routes blob operations across a group of backing stores
//!
//! This crate provides:
//! - A blob store contract with local-filesystem and in-memory backends
//! - A group store that places new blobs with a pluggable strategy and finds
//!   existing ones through a TTL-bounded location cache
//! - A generic state guard used to give every store a lifecycle
//! - REST API over the group store

pub mod api;
pub mod blob_store;
pub mod config;
pub mod group;
pub mod lifecycle;
pub mod registry;
pub mod state_guard;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use group::GroupStore;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub group: Arc<GroupStore>,
}
