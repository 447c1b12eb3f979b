// src/routes.rs

use axum::{
    Router,
    http::{Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers::submissions, state::StubState, utils::auth::require_token};

/// Assembles the stub grader router.
///
/// * `POST /submissions` and `GET /submissions/{id}`.
/// * Applies global middleware (Trace, CORS, optional bearer token).
pub fn create_router(state: StubState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/submissions", post(submissions::create_submission))
        .route("/submissions/{id}", get(submissions::get_submission))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
