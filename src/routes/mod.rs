pub mod health;
pub mod progress;
pub mod questions;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// Full API surface minus the outermost layers (CORS, tracing, body limit)
/// which `main` applies. Tests drive this router directly.
pub fn api_router(state: AppState, upload_rps: u32) -> Router {
    let base = Router::new().route("/health", get(health::health));

    let admin_api = Router::new()
        .route(
            "/api/admin/questions/extract",
            post(questions::extract_questions),
        )
        .route("/api/admin/questions", post(questions::save_questions))
        .layer(axum::middleware::from_fn_with_state(
            crate::middleware::rate_limit::new_rps_state(upload_rps),
            crate::middleware::rate_limit::per_user_rps_middleware,
        ));

    let user_api = Router::new()
        .route("/api/questions", get(questions::list_questions))
        .route("/api/progress/sessions", post(progress::record_session))
        .route("/api/progress/:exam_number", get(progress::get_progress));

    base.merge(
        admin_api
            .merge(user_api)
            .layer(axum::middleware::from_fn(
                crate::middleware::auth::require_user,
            )),
    )
    .with_state(state)
}
