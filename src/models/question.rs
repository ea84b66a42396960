use crate::models::subject::Subject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// A question as it comes out of the extraction pipeline, before the
/// operator confirms it for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedQuestion {
    pub question: String,
    pub options: Vec<QuestionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub needs_manual_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    Upload,
    Manual,
}

/// The persisted record. `correct_answer` is always a resolved option id
/// here; questions that could not be resolved carry `needs_manual_review`
/// and are excluded from gradeable delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredQuestion {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub needs_manual_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub subject: Subject,
    pub topic_id: String,
    pub exam_period_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub source: QuestionSource,
}
