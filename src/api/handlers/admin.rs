use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::blob_store::{BlobStore, StoreMetrics};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MemberStatus {
    pub name: String,
    pub writable: bool,
}

#[derive(Debug, Serialize)]
pub struct GroupStatusResponse {
    pub members: Vec<MemberStatus>,
    pub name: String,
    pub state: LifecycleState,
    pub strategy: String,
}

#[derive(Debug, Serialize)]
pub struct CompactResponse {
    pub compacted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn group_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<GroupStatusResponse>>, ApiError> {
    let group = &state.group;
    let members = group
        .members()
        .await?
        .iter()
        .map(|m| MemberStatus {
            name: m.name().to_string(),
            writable: m.is_writable(),
        })
        .collect();

    Ok(JSend::success(GroupStatusResponse {
        members,
        name: group.group_configuration().name.clone(),
        state: group.state().await,
        strategy: group.strategy().name().to_string(),
    }))
}

pub async fn metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<StoreMetrics>>, ApiError> {
    Ok(JSend::success(state.group.metrics().await?))
}

pub async fn compact(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<CompactResponse>>, ApiError> {
    state.group.compact(None).await?;
    tracing::warn!("Compacted every group member");
    Ok(JSend::success(CompactResponse { compacted: true }))
}
