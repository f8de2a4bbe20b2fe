//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod clusters;
mod meta_requests;
mod migrations;
mod runner;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        .route("/health", get(health_check))
        .route("/api/parser", post(clusters::parse_statement))
        .route(
            "/api/clusters",
            get(clusters::list_clusters).post(clusters::register_cluster),
        )
        // Human API
        .route(
            "/api/migrations",
            get(migrations::list_migrations).post(migrations::create_migration),
        )
        .route(
            "/api/migrations/{id}",
            get(migrations::get_migration)
                .put(migrations::edit_migration)
                .delete(migrations::delete_migration),
        )
        .route("/api/migrations/{id}/{action}", post(migrations::perform_action))
        .route("/api/meta_requests", post(meta_requests::create_meta_request))
        .route(
            "/api/meta_requests/{id}",
            get(meta_requests::get_meta_request).put(meta_requests::edit_meta_request),
        )
        .route("/api/meta_requests/{id}/bulk_action", post(meta_requests::bulk_action))
        // Execution agent API
        .route("/api/v1/migrations/staged", get(runner::staged))
        .route("/api/v1/migrations/{id}", patch(runner::update))
        .route("/api/v1/migrations/{id}/unstage", post(runner::unstage))
        .route("/api/v1/migrations/{id}/next_step", post(runner::next_step))
        .route("/api/v1/migrations/{id}/offer", post(runner::offer))
        .route("/api/v1/migrations/{id}/complete", post(runner::complete))
        .route("/api/v1/migrations/{id}/cancel", post(runner::cancel))
        .route("/api/v1/migrations/{id}/fail", post(runner::fail))
        .route("/api/v1/migrations/{id}/error", post(runner::error))
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [
        header::CONTENT_TYPE,
        header::ACCEPT,
        HeaderName::from_static(crate::auth::USER_HEADER),
        HeaderName::from_static(crate::auth::CAPABILITIES_HEADER),
    ];

    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };
    cors.allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
