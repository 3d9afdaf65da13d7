//! HTTP surface: the rate-limited users endpoint and a health check.

mod admission;
mod health;
mod server;
mod users;

pub use admission::rate_check;
pub use server::{serve_on, HttpServer};
pub use users::{StaticUserDirectory, User, UserDirectory};

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::TurnstileError;
use crate::ratelimit::RateLimiter;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub users: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, users: Arc<dyn UserDirectory>) -> Self {
        Self { limiter, users }
    }
}

/// Build the application router.
///
/// Only `/users` sits behind admission control; `/health` must stay
/// reachable for probes even when a client has exhausted its quota.
pub fn router(state: AppState) -> Router {
    let limited = Router::new()
        .route("/users", get(users::list_users))
        .route_layer(axum::middleware::from_fn_with_state(
            state.limiter.clone(),
            admission::rate_check,
        ));

    Router::new()
        .merge(limited)
        .route("/health", get(health::health))
        .with_state(state)
}

/// Body of plain error responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

impl IntoResponse for TurnstileError {
    fn into_response(self) -> Response {
        // Internal detail stays in the logs.
        error!(error = %self, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(MessageBody {
                message: "Server error".to_string(),
            }),
        )
            .into_response()
    }
}
