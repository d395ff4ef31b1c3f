//! HTTP surface of the publication workflow.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::Router;

/// Router with the full middleware stack, as served in production.
pub fn app(state: state::AppState) -> Router {
    routes::build_router(state)
        .layer(middleware::body_limit_layer())
        .layer(middleware::request_tracing::trace_layer())
        .layer(middleware::cors::cors_layer())
}
