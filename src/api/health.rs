use axum::Json;
use serde_json::{json, Value};

/// GET /healthz — liveness probe. Checks nothing downstream.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
