use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// CORS for the editor UI: any origin, the methods and headers the API uses.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
