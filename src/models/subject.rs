use serde::{Deserialize, Serialize};

/// Closed set of top-level content categories. Each subject maps to a fixed
/// storage collection key under an exam period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Fundamentals,
    Technology,
    Regulations,
    Practice,
}

impl Subject {
    pub const ALL: [Subject; 4] = [
        Subject::Fundamentals,
        Subject::Technology,
        Subject::Regulations,
        Subject::Practice,
    ];

    pub fn collection_key(&self) -> &'static str {
        match self {
            Subject::Fundamentals => "fundamentals_questions",
            Subject::Technology => "technology_questions",
            Subject::Regulations => "regulations_questions",
            Subject::Practice => "practice_questions",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Subject::Fundamentals => "fundamentals",
            Subject::Technology => "technology",
            Subject::Regulations => "regulations",
            Subject::Practice => "practice",
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Subject {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fundamentals" => Ok(Subject::Fundamentals),
            "technology" => Ok(Subject::Technology),
            "regulations" => Ok(Subject::Regulations),
            "practice" => Ok(Subject::Practice),
            other => Err(crate::error::Error::BadRequest(format!(
                "Unknown subject: {}",
                other
            ))),
        }
    }
}
