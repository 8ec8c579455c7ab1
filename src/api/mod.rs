use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod extract;
pub mod health;
pub mod messages;
pub mod schemas;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug)]
pub struct AppState {
    pub message_service: MessageService,
    pub health_service: HealthService,
}

#[derive(Debug)]
pub struct ServiceContainer {
    pub message_service: MessageService,
    pub health_service: HealthService,
}

/// Configures and returns the application router.
pub fn app_router(services: ServiceContainer) -> Router {
    let state = AppState { message_service: services.message_service, health_service: services.health_service };

    Router::new()
        .route("/health", get(health::health))
        .route("/readyz", get(health::readyz))
        .route("/messages", post(messages::store_message))
        .route("/messages/{id}", get(messages::list_messages).delete(messages::delete_message))
        .route("/messages/{id}/delivered", post(messages::mark_delivered))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<RequestId>()
                        .and_then(|id| id.header_value().to_str().ok())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        let status = response.status();
                        span.record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER), MakeRequestUuid))
        .with_state(state)
}
