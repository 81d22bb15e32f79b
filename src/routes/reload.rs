use crate::server::SharedState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::instrument;

/// Re-reads both model artifacts from disk, for operators swapping weights
/// without a restart.
#[instrument(skip(state))]
pub async fn reload_models(State(state): State<SharedState>) -> impl IntoResponse {
    match state.segmentation.reload_models() {
        Ok(()) => (StatusCode::OK, "models reloaded".to_string()),
        Err(e) => {
            tracing::error!("model reload failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
