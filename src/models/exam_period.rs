use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user, per-exam-number, per-year bucket that scopes a set of
/// questions. At most one per (created_by, exam_number, year); the store
/// cannot enforce that, so the registry reconciles duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamPeriod {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub exam_number: i32,
    pub year: i32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ExamPeriod {
    pub fn display_name(exam_number: i32, year: i32) -> String {
        format!("Exam {} ({})", exam_number, year)
    }
}
