//! Liveness and database connectivity check.

use axum::Json;
use axum::extract::State;
use tracing::warn;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /api/health`: always 200; `status` is `degraded` when the store is
/// unreachable.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let timeout = state.config.auth.dependency_timeout;
    let db_connected = match tokio::time::timeout(timeout, state.stores.accounts.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("store ping failed: {e}");
            false
        }
        Err(_) => {
            warn!("store ping timed out after {timeout:?}");
            false
        }
    };

    Json(HealthResponse {
        status: if db_connected { "ok" } else { "degraded" }.to_string(),
        version: mintgate_core::version().to_string(),
        db_connected,
    })
}
