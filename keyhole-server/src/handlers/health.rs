use axum::response::Json;
use serde_json::{json, Value};

/// Liveness probe. No authentication, no credential touch.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
