use crate::dto::questions_dto::{ExtractResponse, QuestionQuery, SaveQuestionsPayload};
use crate::error::Result;
use crate::middleware::auth::CurrentUser;
use crate::models::question::QuestionSource;
use crate::models::subject::Subject;
use crate::services::question_service::gradeable;
use crate::AppState;
use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use validator::Validate;

const DEFAULT_LIMIT: usize = 20;

/// Multipart upload of one scanned exam page. Returns the analyzed
/// questions for the operator to confirm; nothing is persisted here.
pub async fn extract_questions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut subject: Option<Subject> = None;
    let mut page: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "subject" => {
                let raw = field.text().await?;
                subject = Some(raw.parse()?);
            }
            "page" => {
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await?;
                page = Some((data.to_vec(), mime));
            }
            _ => {}
        }
    }

    let subject = subject
        .ok_or_else(|| crate::error::Error::BadRequest("Subject is required".into()))?;
    let (bytes, mime) = page
        .ok_or_else(|| crate::error::Error::BadRequest("Page image is required".into()))?;

    tracing::info!(
        "Extraction upload by {}: subject={} size={} bytes",
        user.0,
        subject,
        bytes.len()
    );

    let outcome = state
        .extraction_service
        .extract_questions(&bytes, &mime, subject)
        .await?;

    let nothing_usable = outcome.questions.is_empty() && outcome.discarded > 0;
    let response = ExtractResponse {
        success: !nothing_usable,
        error: nothing_usable.then(|| "No usable questions found on this page".to_string()),
        discarded: outcome.discarded,
        strategy: outcome.strategy.to_string(),
        questions: outcome.questions,
    };
    Ok(Json(response))
}

/// Persists a confirmed batch under exam period / subject / topic.
pub async fn save_questions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<SaveQuestionsPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let report = state
        .question_service
        .save_questions(
            payload.questions,
            payload.subject,
            &user.0,
            payload.exam_number,
            &payload.topic_id,
            payload.source.unwrap_or(QuestionSource::Upload),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn list_questions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<QuestionQuery>,
) -> Result<impl IntoResponse> {
    let use_cache = !query.refresh.unwrap_or(false);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    let mut questions = state
        .question_service
        .read_questions(
            query.exam,
            query.subject,
            query.topic.as_deref(),
            limit,
            &user.0,
            use_cache,
        )
        .await?;

    if query.gradeable_only.unwrap_or(false) {
        questions = gradeable(questions);
    }

    Ok(Json(questions))
}
