//! API layer -- axum routes, handlers, and middleware.

mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use self::state::AppState;
use crate::service::Aggregator;

/// Build the viewer-facing router.
pub fn router(service: Arc<Aggregator>) -> Router {
    Router::new()
        .nest("/api", routes::api_routes())
        .fallback(fallback)
        .with_state(AppState { service })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
