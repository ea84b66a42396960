use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicProgress {
    pub completed: u32,
    pub correct: u32,
    /// Size of the topic's question pool as last seen, not a sum of
    /// attempts.
    pub total: u32,
}

/// Mutable per-(user, exam) aggregate. `completed_questions` never
/// decreases across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: String,
    pub exam_number: i32,
    pub completed_questions: u32,
    pub correct_answers: u32,
    pub total_attempts: u32,
    pub total_questions: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub topics: HashMap<String, TopicProgress>,
}

impl UserProgress {
    pub fn document_id(user_id: &str, exam_number: i32) -> String {
        format!("{}_{}", user_id, exam_number)
    }
}

/// Immutable record of one quiz session, appended to the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    pub user_id: String,
    pub exam_number: i32,
    pub topic_id: String,
    pub completed: u32,
    pub correct: u32,
    pub total: u32,
    pub question_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}
