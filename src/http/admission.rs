//! Rate-check middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ratelimit::{ClientKey, Decision, RateLimiter};

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Body of a `429 Too Many Requests` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedBody {
    pub message: String,
    /// Formatted as `"<seconds> Seconds"`.
    pub retry_after: String,
}

/// Admit or reject a request based on its peer address.
///
/// Rejections end the request with `429`; admitted responses carry the
/// configured limit and, when the counter was read, the remaining quota.
pub async fn rate_check(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let key = ClientKey::from_ip(peer.ip());
    let admission = limiter.admit(&key).await;

    match admission.decision {
        Decision::Deny { retry_after_secs } => {
            debug!(client = %key, retry_after_secs, "Rejecting request");
            too_many_requests(retry_after_secs)
        }
        Decision::Allow => {
            let max_requests = limiter.settings().max_requests;
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(max_requests));
            if let Some(remaining) = admission.remaining(max_requests) {
                headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            }
            response
        }
    }
}

fn too_many_requests(retry_after_secs: u64) -> Response {
    let body = RateLimitedBody {
        message: "Too many requests. Please try again later.".to_string(),
        retry_after: format!("{} Seconds", retry_after_secs),
    };
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, HeaderValue::from(retry_after_secs))],
        Json(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{app, get_from, json_body};
    use crate::ratelimit::{FailurePolicy, LimiterSettings};
    use crate::store::testing::FailingStore;
    use crate::store::MemoryCounterStore;
    use std::time::Duration;

    fn peer(last_octet: u8) -> SocketAddr {
        SocketAddr::from(([10, 1, 1, last_octet], 40000))
    }

    fn settings(max_requests: u64, window_seconds: u64) -> LimiterSettings {
        LimiterSettings {
            max_requests,
            window_seconds,
            ..LimiterSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_request_is_rejected() {
        let app = app(Arc::new(MemoryCounterStore::new()), settings(3, 60));

        for remaining in ["2", "1", "0"] {
            let response = get_from(&app, "/users", peer(1)).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[&RATE_LIMIT_LIMIT], "3");
            assert_eq!(response.headers()[&RATE_LIMIT_REMAINING], remaining);
        }

        let response = get_from(&app, "/users", peer(1)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "60");

        let body = json_body(response).await;
        assert_eq!(body["message"], "Too many requests. Please try again later.");
        assert_eq!(body["retryAfter"], "60 Seconds");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_limited_separately() {
        let app = app(Arc::new(MemoryCounterStore::new()), settings(1, 60));

        assert_eq!(get_from(&app, "/users", peer(2)).await.status(), StatusCode::OK);
        assert_eq!(
            get_from(&app, "/users", peer(2)).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(get_from(&app, "/users", peer(3)).await.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_expiry() {
        let app = app(Arc::new(MemoryCounterStore::new()), settings(2, 5));

        assert_eq!(get_from(&app, "/users", peer(4)).await.status(), StatusCode::OK);
        assert_eq!(get_from(&app, "/users", peer(4)).await.status(), StatusCode::OK);

        tokio::time::advance(Duration::from_secs(1)).await;
        let response = get_from(&app, "/users", peer(4)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(response).await["retryAfter"], "5 Seconds");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(get_from(&app, "/users", peer(4)).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fail_open_passes_through_without_remaining() {
        let app = app(
            Arc::new(FailingStore::unavailable()),
            LimiterSettings {
                failure_policy: FailurePolicy::Open,
                ..LimiterSettings::default()
            },
        );

        let response = get_from(&app, "/users", peer(5)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(&RATE_LIMIT_REMAINING).is_none());
    }

    #[tokio::test]
    async fn test_fail_closed_rejects() {
        let app = app(
            Arc::new(FailingStore::unavailable()),
            LimiterSettings {
                failure_policy: FailurePolicy::Closed,
                ..LimiterSettings::default()
            },
        );

        let response = get_from(&app, "/users", peer(6)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_is_not_rate_limited() {
        let app = app(Arc::new(MemoryCounterStore::new()), settings(1, 60));

        for _ in 0..5 {
            assert_eq!(get_from(&app, "/health", peer(7)).await.status(), StatusCode::OK);
        }
        assert_eq!(get_from(&app, "/users", peer(7)).await.status(), StatusCode::OK);
    }
}
