use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    let mut router = Router::new()
        // Blobs
        .route(
            "/blobs",
            post(handlers::create_blob).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/blobs/:id", get(handlers::get_blob))
        .route("/blobs/:id", delete(handlers::delete_blob))
        .route("/blobs/:id/exists", get(handlers::blob_exists))
        .route("/blobs/:id/copy", post(handlers::copy_blob))
        .route("/blobs/:id/undelete", post(handlers::undelete_blob))
        // Internal
        .route("/_internal/group", get(handlers::group_status))
        .route("/_internal/metrics", get(handlers::metrics))
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, compaction route is available.");
        router = router.route("/admin/compact", post(handlers::compact));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
