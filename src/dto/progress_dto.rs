use crate::models::progress::UserProgress;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RecordSessionPayload {
    #[validate(range(min = 1))]
    pub exam_number: i32,
    #[validate(length(min = 1))]
    pub topic_id: String,
    pub completed: u32,
    pub correct: u32,
    pub total: u32,
    #[serde(default)]
    pub question_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub progress: Option<UserProgress>,
    pub completion_percentage: u32,
}
