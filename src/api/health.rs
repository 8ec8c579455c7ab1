use crate::api::AppState;
use crate::api::schemas::health::{HealthResponse, ReadinessResponse};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use time::OffsetDateTime;

/// Liveness and identity; never touches the store.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.health_service.node_id().to_string(),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Readiness probe: checks connectivity to the document store.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.health_service.check_store().await {
        Ok(()) => (StatusCode::OK, Json(ReadinessResponse { status: "ok".into(), store: "ok".into() })),
        Err(e) => {
            tracing::warn!(error = %e, component = "store", "Readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse { status: "error".into(), store: "error".into() }),
            )
        }
    }
}
