mod health;
mod index;
mod metrics;
mod reload;
mod segment;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::index))
        .route("/segment", post(segment::segment_image))
        .route("/models/reload", post(reload::reload_models))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
