use crate::api::AppState;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the engine is serving; includes pool and write-back counters.
pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine = &state.engine;
    Json(serde_json::json!({
        "status": "ready",
        "activeCards": engine.active_count(),
        "writer": engine.writer_stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
