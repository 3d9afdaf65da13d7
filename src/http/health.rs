//! Liveness endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::AppState;
use crate::store::StoreError;

/// Key read to check the counter store; it is never written.
const PROBE_KEY: &str = "rate_limit:__health__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthBody {
    /// `"ok"`, or `"degraded"` when the counter store cannot be read.
    pub status: String,
    /// `"ok"`, `"unavailable"` or `"error"`.
    pub store: String,
    pub timestamp: String,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let limiter = &state.limiter;
    let probe = tokio::time::timeout(limiter.settings().store_timeout, limiter.store().get(PROBE_KEY))
        .await
        .unwrap_or_else(|_| Err(StoreError::Unavailable("health probe timed out".to_string())));

    let store = match probe {
        Ok(_) => "ok",
        Err(err) => {
            warn!(error = %err, "Counter store health probe failed");
            if err.is_unavailable() {
                "unavailable"
            } else {
                "error"
            }
        }
    };

    Json(HealthBody {
        status: if store == "ok" { "ok" } else { "degraded" }.to_string(),
        store: store.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
