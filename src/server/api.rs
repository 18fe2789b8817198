//! API route definitions

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use super::{handlers, state::AppState};

async fn handle_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": true,
            "message": "Not found. Visit /health to check API status.",
        })),
    )
}

async fn handle_405() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "error": true,
            "message": "Method not allowed. Check the API documentation for supported methods.",
        })),
    )
}

/// Create the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_upload_size = state.config.max_upload_size;

    let api_routes = Router::new()
        // Models
        .route("/models", get(handlers::list_models))
        .route("/models/types", get(handlers::get_model_types))
        .route("/models/train", post(handlers::train_model))
        .route("/models/predict", post(handlers::predict))
        .route("/models/:name", delete(handlers::delete_model))
        .route("/models/:name/retrain", put(handlers::retrain_model))
        // Datasets
        .route("/datasets", get(handlers::list_datasets))
        .route("/datasets/upload", post(handlers::upload_dataset))
        .route("/datasets/sync", post(handlers::sync_datasets))
        .route("/datasets/:name", get(handlers::get_dataset).delete(handlers::delete_dataset))
        .fallback(handle_404)
        .method_not_allowed_fallback(handle_405);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handlers::health_check))
        .fallback(handle_404)
        .method_not_allowed_fallback(handle_405)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
