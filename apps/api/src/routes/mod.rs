pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::evaluation::handlers::handle_evaluate;
use crate::state::AppState;
use crate::uploads::handlers::handle_upload;

/// Largest accepted upload request (all files together).
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/evaluate", post(handle_evaluate))
        .with_state(state)
}
