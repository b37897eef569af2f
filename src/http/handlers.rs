//! HTTP handlers for the Turnstile service.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::identity::IdentityResolver;
use crate::ratelimit::RateLimiter;

/// Shared application state.
pub struct AppState {
    /// The admission-control limiter, shared by every request
    pub limiter: Arc<dyn RateLimiter>,
    /// How request identities are derived
    pub identity: IdentityResolver,
}

impl AppState {
    /// Bundle a limiter and resolver into shareable state.
    pub fn new(limiter: Arc<dyn RateLimiter>, identity: IdentityResolver) -> Arc<Self> {
        Arc::new(Self { limiter, identity })
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Admission check request (external authorization mode).
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub identity: String,
}

/// Admission check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    pub identity: String,
}

/// Limiter statistics.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub algorithm: String,
    pub tracked_identities: usize,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "turnstile",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Decide admission for an identity supplied by the caller.
///
/// Lets a proxy sitting in front of another service ask for a decision
/// without routing the request itself through Turnstile.
pub async fn check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let identity = req.identity.trim();
    if identity.is_empty() {
        warn!("Received admission check with empty identity");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "identity is required".to_string(),
                code: "INVALID_IDENTITY",
            }),
        )
            .into_response();
    }

    let allowed = state.limiter.allow(identity);
    let status = if allowed {
        debug!(identity = %identity, "Admission check passed");
        StatusCode::OK
    } else {
        info!(identity = %identity, "Admission check rate limited");
        StatusCode::TOO_MANY_REQUESTS
    };

    (
        status,
        Json(CheckResponse {
            allowed,
            identity: identity.to_string(),
        }),
    )
        .into_response()
}

/// Sample protected endpoint.
pub async fn ping() -> &'static str {
    "pong"
}

/// Report the algorithm and table size.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        algorithm: state.limiter.name().to_string(),
        tracked_identities: state.limiter.tracked_identities(),
    })
}
