use axum::{http::StatusCode, Json, response::IntoResponse};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "gymdesk",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Gym membership and payment backend",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "auth": "/auth/login",
            "payments": "/api/payments",
            "memberships": "/api/memberships",
            "attendance": "/api/attendance",
            "admin": "/admin"
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
