use crate::models::question::{AnalyzedQuestion, QuestionSource};
use crate::models::subject::Subject;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// What the operator gets back from an upload: the analyzed questions to
/// confirm or discard. Zero questions with discards means the page had only
/// unusable candidates.
#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub questions: Vec<AnalyzedQuestion>,
    pub discarded: usize,
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveQuestionsPayload {
    #[validate(length(min = 1, message = "At least one question is required"))]
    pub questions: Vec<AnalyzedQuestion>,
    pub subject: Subject,
    #[validate(range(min = 1))]
    pub exam_number: i32,
    #[validate(length(min = 1))]
    pub topic_id: String,
    pub source: Option<QuestionSource>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionQuery {
    pub exam: i32,
    pub subject: Subject,
    pub topic: Option<String>,
    pub limit: Option<usize>,
    /// Bypass the cache and refetch from the store.
    pub refresh: Option<bool>,
    /// Exclude questions flagged for manual review from the result.
    pub gradeable_only: Option<bool>,
}
