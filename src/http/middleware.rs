//! Rate limiting middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, trace};

use super::handlers::{AppState, ErrorResponse};

/// Gate a request on the limiter before it reaches downstream handlers.
///
/// Rejected requests get `429 Too Many Requests` and never reach `next`.
pub async fn rate_limit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let identity = state.identity.resolve(&request);

    if state.limiter.allow(&identity) {
        trace!(identity = %identity, path = %request.uri().path(), "Request admitted");
        return next.run(request).await;
    }

    info!(
        identity = %identity,
        method = %request.method(),
        path = %request.uri().path(),
        "Request rate limited"
    );
    too_many_requests()
}

/// The response sent for rejected requests.
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse {
            error: "too many requests".to_string(),
            code: "RATE_LIMITED",
        }),
    )
        .into_response()
}
