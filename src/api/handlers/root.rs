use crate::api::handlers::health::SERVICE_NAME;
use axum::{response::IntoResponse, Json};
use serde_json::json;

/// Service card listing the public endpoints.
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /api/auth/generate-code": "Create a one-time SSH verification code",
            "GET /api/auth/verify/{code}": "Poll a code for its status and approved public key",
            "GET /health": "Health check",
        },
    }))
}
