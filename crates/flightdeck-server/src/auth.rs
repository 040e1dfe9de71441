use std::sync::Arc;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::dto::ErrorResponse;
use crate::state::AppState;

fn token_matches(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Middleware guarding write routes with `Authorization: Bearer <token>`.
///
/// Answers 403 when no admin token is configured, 401 on a missing or
/// wrong token.
pub async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        let body = ErrorResponse {
            error: "forbidden".to_string(),
            message: "Write endpoints are disabled. Set FLIGHTDECK_ADMIN_TOKEN to enable them."
                .to_string(),
        };
        return (StatusCode::FORBIDDEN, axum::Json(body)).into_response();
    };

    let authenticated = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .is_some_and(|token| token_matches(token, expected));

    if !authenticated {
        let body = ErrorResponse {
            error: "unauthorized".to_string(),
            message: "Missing or invalid Authorization header. Expected: Bearer <admin_token>"
                .to_string(),
        };
        return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
    }

    next.run(request).await
}
