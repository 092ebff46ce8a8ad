//! REST handlers.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::errors::AppResult;
use crate::state::AppState;

/// `GET /`: liveness probe.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "parla",
    }))
}

/// `GET /api/turns`: snapshot of in-flight turns across all sessions.
pub async fn turns_status(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let turns: Vec<Value> = state
        .registry
        .active_turns()
        .into_iter()
        .map(|info| {
            json!({
                "id": info.id,
                "name": info.name,
                "age_ms": info.started_at.elapsed().as_millis() as u64,
                "language": info.metadata.language,
                "voice": info.metadata.voice,
                "session": info.metadata.session,
            })
        })
        .collect();

    Ok(Json(json!({
        "count": turns.len(),
        "turns": turns,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::registry::TurnMetadata;

    #[tokio::test]
    async fn test_health_check_payload() {
        let Json(body) = health_check().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_turns_status_reflects_registry() {
        let state = AppState::new(ServerConfig::default());
        let (id, _token) = state.registry.start("voice turn", TurnMetadata::default());

        let result = turns_status(State(Arc::clone(&state))).await.unwrap();
        let body = result.0;
        assert_eq!(body["count"], 1);
        assert_eq!(body["turns"][0]["id"], json!(id));

        state.registry.cleanup(id);
        let result = turns_status(State(state)).await.unwrap();
        assert_eq!(result.0["count"], 0);
    }
}
