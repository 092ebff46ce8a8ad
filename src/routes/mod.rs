//! Router assembly.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the full application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::api::health_check))
        .route("/api/turns", get(handlers::api::turns_status))
        .route("/ws/voice", get(handlers::ws::ws_voice_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
