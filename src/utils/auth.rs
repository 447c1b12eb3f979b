// src/utils/auth.rs

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};

use crate::state::StubState;

/// Axum Middleware: Bearer token check.
///
/// Passes every request through when the stub has no token configured.
/// Otherwise a missing or different `Authorization: Bearer` value gets 401.
pub async fn require_token(
    State(state): State<StubState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(req).await),
        _ => {
            tracing::warn!("Rejected request without a valid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
