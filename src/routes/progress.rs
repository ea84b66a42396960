use crate::dto::progress_dto::{ProgressResponse, RecordSessionPayload};
use crate::error::{Error, Result};
use crate::middleware::auth::CurrentUser;
use crate::services::progress_service::SessionOutcome;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use validator::Validate;

pub async fn record_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<RecordSessionPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    if payload.correct > payload.completed {
        return Err(Error::BadRequest(
            "correct cannot exceed completed".to_string(),
        ));
    }
    if payload.completed > payload.total && payload.total > 0 {
        return Err(Error::BadRequest(
            "completed cannot exceed the session's question pool".to_string(),
        ));
    }

    let progress = state
        .progress_service
        .record_session(
            &user.0,
            payload.exam_number,
            &payload.topic_id,
            SessionOutcome {
                completed: payload.completed,
                correct: payload.correct,
                total: payload.total,
            },
            payload.question_ids,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(progress)))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(exam_number): Path<i32>,
) -> Result<impl IntoResponse> {
    let progress = state
        .progress_service
        .get_progress(&user.0, exam_number)
        .await?;
    let completion_percentage = state
        .progress_service
        .completion_percentage(&user.0, exam_number, &state.question_service)
        .await;

    Ok(Json(ProgressResponse {
        progress,
        completion_percentage,
    }))
}
