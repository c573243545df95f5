mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

pub use self::state::AppState;

/// Build the HTTP API router.
pub fn create_app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route("/ready", get(api::ready_handler))
        .route("/images", get(api::list_images_handler))
        .route("/images/{filename}", get(api::serve_image_handler))
        .route("/upload", post(api::upload_handler))
        .route("/recognize", post(api::recognize_handler))
        .route("/compare", post(api::compare_handler))
        .route("/reload", post(api::reload_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}
