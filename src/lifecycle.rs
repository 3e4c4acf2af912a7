//! Conventional component lifecycle and the state requirements of every
//! store operation.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::blob_store::BlobStoreError;
use crate::state_guard::{self, StateGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleState {
    New,
    Started,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::New => "NEW",
            LifecycleState::Started => "STARTED",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Failed => "FAILED",
        })
    }
}

pub type Requirement = state_guard::Requirement<LifecycleState>;

use LifecycleState::*;

const STARTED: &[LifecycleState] = &[Started];
const STARTABLE: &[LifecycleState] = &[New, Stopped, Failed];
const INACTIVE: &[LifecycleState] = &[New, Stopped, Failed];

/// Externally callable operations of a lifecycle-managed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    Remove,
    Create,
    Get,
    Copy,
    Delete,
    DeleteHard,
    Undelete,
    Exists,
    IsEmpty,
    Compact,
    Metrics,
}

impl Operation {
    /// Default state requirements for the store contract.
    pub fn requirement(self) -> Requirement {
        match self {
            Operation::Start => Requirement::Transition {
                from: Some(STARTABLE),
                to: Started,
                silent: false,
            },
            Operation::Stop => Requirement::Transition {
                from: Some(STARTED),
                to: Stopped,
                silent: false,
            },
            Operation::Remove => Requirement::Guard(INACTIVE),
            Operation::Exists | Operation::IsEmpty => Requirement::Unguarded,
            Operation::Create
            | Operation::Get
            | Operation::Copy
            | Operation::Delete
            | Operation::DeleteHard
            | Operation::Undelete
            | Operation::Compact
            | Operation::Metrics => Requirement::Guard(STARTED),
        }
    }
}

/// A guard in its initial state, failing into `FAILED`.
pub fn lifecycle_guard(name: impl Into<String>) -> StateGuard<LifecycleState> {
    StateGuard::builder(New).name(name).failure(Failed).build()
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self) -> Result<(), BlobStoreError>;

    async fn stop(&self) -> Result<(), BlobStoreError>;

    async fn state(&self) -> LifecycleState;
}
