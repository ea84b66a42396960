//! Pure repair and validation of raw recognition candidates. Everything in
//! here is synchronous and total: `normalize_candidate` never fails, it only
//! flags what it had to guess at.

use crate::models::question::{AnalyzedQuestion, QuestionOption};
use serde_json::Value as JsonValue;

const MIN_QUESTION_CHARS: usize = 5;
const MIN_OPTIONS: usize = 2;

/// Correct-answer literals accepted by the final validity check even when
/// the candidate has not been resolved against its option list yet.
const ANSWER_LITERALS: [&str; 8] = ["A", "B", "C", "D", "1", "2", "3", "4"];

#[derive(Debug)]
pub struct NormalizedBatch {
    pub questions: Vec<AnalyzedQuestion>,
    pub discarded: usize,
}

/// Normalizes every candidate in a raw recognition payload (either
/// `{"questions": [...]}` or a bare array) and drops the ones that remain
/// unusable. The discard count lets the caller distinguish "page had
/// nothing" from "page had only garbage".
pub fn normalize_batch(raw: &JsonValue) -> NormalizedBatch {
    let candidates = raw
        .get("questions")
        .and_then(|q| q.as_array())
        .or_else(|| raw.as_array())
        .cloned()
        .unwrap_or_default();

    let mut questions = Vec::new();
    let mut discarded = 0;
    for (idx, candidate) in candidates.iter().enumerate() {
        let normalized = normalize_candidate(candidate, idx);
        if validate_question(&normalized) {
            questions.push(normalized);
        } else {
            discarded += 1;
        }
    }

    NormalizedBatch {
        questions,
        discarded,
    }
}

fn letter_id(index: usize) -> String {
    if index < 26 {
        ((b'A' + index as u8) as char).to_string()
    } else {
        format!("O{}", index + 1)
    }
}

fn coerce_options(raw: Option<&JsonValue>, flagged: &mut bool) -> Vec<QuestionOption> {
    let mut options: Vec<QuestionOption> = Vec::new();

    if let Some(items) = raw.and_then(|o| o.as_array()) {
        for (idx, item) in items.iter().enumerate() {
            let (id, text, is_correct) = match item {
                JsonValue::String(s) => (None, s.trim().to_string(), false),
                JsonValue::Object(map) => {
                    let id = map
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.trim().to_uppercase())
                        .filter(|s| !s.is_empty());
                    let text = map
                        .get("text")
                        .or_else(|| map.get("label"))
                        .or_else(|| map.get("value"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    let is_correct = map
                        .get("isCorrect")
                        .or_else(|| map.get("is_correct"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    (id, text, is_correct)
                }
                other => (None, other.to_string(), false),
            };

            options.push(QuestionOption {
                id: id.unwrap_or_else(|| letter_id(idx)),
                text,
                is_correct,
            });
        }
    }

    while options.len() < MIN_OPTIONS {
        let mut idx = options.len();
        while options.iter().any(|o| o.id == letter_id(idx)) {
            idx += 1;
        }
        options.push(QuestionOption {
            id: letter_id(idx),
            text: format!("Option {} (not recognized)", letter_id(idx)),
            is_correct: false,
        });
        *flagged = true;
    }

    options
}

fn resolve_correct_answer(
    raw: Option<&JsonValue>,
    options: &[QuestionOption],
    flagged: &mut bool,
) -> String {
    let raw_text = match raw {
        Some(JsonValue::String(s)) => Some(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    if let Some(ref text) = raw_text {
        let upper = text.to_uppercase();
        if let Some(opt) = options.iter().find(|o| o.id == upper) {
            return opt.id.clone();
        }
        if let Ok(n) = text.parse::<usize>() {
            if (1..=4).contains(&n) {
                if let Some(opt) = options.get(n - 1) {
                    return opt.id.clone();
                }
            }
        }
    }

    // A marker on the option itself counts as a resolved reference.
    if let Some(opt) = options.iter().find(|o| o.is_correct) {
        return opt.id.clone();
    }

    // Lossy fallback: take the first option, but never silently — the
    // question stays out of gradeable delivery until someone looks at it.
    *flagged = true;
    options
        .first()
        .map(|o| o.id.clone())
        .unwrap_or_else(|| letter_id(0))
}

/// Repairs one raw candidate into a well-formed AnalyzedQuestion. Total:
/// any JSON shape maps to *something*, with `needs_manual_review` recording
/// every guess made along the way.
pub fn normalize_candidate(candidate: &JsonValue, index: usize) -> AnalyzedQuestion {
    let mut flagged = candidate
        .get("needsManualReview")
        .or_else(|| candidate.get("needs_manual_review"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let raw_text = candidate
        .get("question")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let question = if raw_text.chars().count() < MIN_QUESTION_CHARS {
        flagged = true;
        format!("Question {} (text not recognized)", index + 1)
    } else {
        raw_text
    };

    let mut options = coerce_options(candidate.get("options"), &mut flagged);

    let correct_answer = resolve_correct_answer(
        candidate
            .get("correctAnswer")
            .or_else(|| candidate.get("correct_answer")),
        &options,
        &mut flagged,
    );

    for opt in options.iter_mut() {
        opt.is_correct = opt.id == correct_answer;
    }

    let text_field = |key: &str| {
        candidate
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    AnalyzedQuestion {
        question,
        options,
        correct_answer: Some(correct_answer),
        explanation: text_field("explanation"),
        difficulty: text_field("difficulty"),
        topic: text_field("topic"),
        needs_manual_review: flagged,
        notes: text_field("notes"),
    }
}

/// Final validity check. Candidates that fail are dropped from the result
/// set rather than erroring the batch.
pub fn validate_question(q: &AnalyzedQuestion) -> bool {
    if q.question.trim().chars().count() < MIN_QUESTION_CHARS {
        return false;
    }
    if q.options.len() < MIN_OPTIONS {
        return false;
    }
    if q.options.iter().any(|o| o.text.trim().is_empty()) {
        return false;
    }
    match &q.correct_answer {
        Some(ans) => {
            q.options.iter().any(|o| &o.id == ans)
                || ANSWER_LITERALS.contains(&ans.as_str())
        }
        None => false,
    }
}
