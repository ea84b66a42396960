use crate::database::store::{prune_nulls, DocumentStore};
use crate::error::Result;
use crate::models::progress::{QuizSession, UserProgress};
use crate::services::question_service::QuestionService;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

const SESSIONS_COLLECTION: &str = "quiz_sessions";
const PROGRESS_COLLECTION: &str = "user_progress";

#[derive(Debug, Clone, Copy)]
pub struct SessionOutcome {
    pub completed: u32,
    pub correct: u32,
    /// Size of the question pool the session was drawn from.
    pub total: u32,
}

/// Append-only session log plus the mutable per-(user, exam) aggregate.
/// Aggregates go absent → created → updated and are never deleted here.
#[derive(Clone)]
pub struct ProgressService {
    store: Arc<dyn DocumentStore>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn record_session(
        &self,
        user_id: &str,
        exam_number: i32,
        topic_id: &str,
        outcome: SessionOutcome,
        question_ids: Vec<String>,
    ) -> Result<UserProgress> {
        let now = Utc::now();
        let session = QuizSession {
            user_id: user_id.to_string(),
            exam_number,
            topic_id: topic_id.to_string(),
            completed: outcome.completed,
            correct: outcome.correct,
            total: outcome.total,
            question_ids,
            created_at: now,
        };
        self.store
            .insert(
                SESSIONS_COLLECTION,
                prune_nulls(serde_json::to_value(&session)?),
            )
            .await?;

        let doc_id = UserProgress::document_id(user_id, exam_number);
        let mut progress = match self.store.get(PROGRESS_COLLECTION, &doc_id).await? {
            Some(doc) => match serde_json::from_value::<UserProgress>(doc.data) {
                Ok(progress) => progress,
                Err(e) => {
                    tracing::error!(
                        "Progress aggregate {} was undecodable ({}), rebuilding from this session",
                        doc_id,
                        e
                    );
                    fresh_aggregate(user_id, exam_number)
                }
            },
            None => fresh_aggregate(user_id, exam_number),
        };

        progress.completed_questions += outcome.completed;
        progress.correct_answers += outcome.correct;
        progress.total_attempts += 1;
        // Totals describe pool size, not attempts: keep the max seen.
        progress.total_questions = progress.total_questions.max(outcome.total);
        progress.last_updated = now;

        let topic = progress.topics.entry(topic_id.to_string()).or_default();
        topic.completed += outcome.completed;
        topic.correct += outcome.correct;
        topic.total = topic.total.max(outcome.total);

        self.store
            .set(
                PROGRESS_COLLECTION,
                &doc_id,
                prune_nulls(serde_json::to_value(&progress)?),
            )
            .await?;

        Ok(progress)
    }

    pub async fn get_progress(
        &self,
        user_id: &str,
        exam_number: i32,
    ) -> Result<Option<UserProgress>> {
        let doc_id = UserProgress::document_id(user_id, exam_number);
        match self.store.get(PROGRESS_COLLECTION, &doc_id).await? {
            Some(doc) => Ok(serde_json::from_value(doc.data).ok()),
            None => Ok(None),
        }
    }

    /// Completed questions against the exam's question inventory, rounded.
    /// Degrades through the aggregate's own recorded total down to 0% —
    /// this never fails.
    pub async fn completion_percentage(
        &self,
        user_id: &str,
        exam_number: i32,
        questions: &QuestionService,
    ) -> u32 {
        let progress = match self.get_progress(user_id, exam_number).await {
            Ok(Some(progress)) => progress,
            Ok(None) => return 0,
            Err(e) => {
                tracing::warn!("Progress lookup failed for {}: {}", user_id, e);
                return 0;
            }
        };

        let inventory = match questions.count_questions(user_id, exam_number).await {
            Ok(count) if count > 0 => count as u32,
            Ok(_) => progress.total_questions,
            Err(e) => {
                tracing::warn!(
                    "Inventory lookup failed for exam {}: {}, using recorded total",
                    exam_number,
                    e
                );
                progress.total_questions
            }
        };
        if inventory == 0 {
            return 0;
        }

        let pct = (progress.completed_questions as f64 / inventory as f64) * 100.0;
        (pct.round() as u32).min(100)
    }
}

fn fresh_aggregate(user_id: &str, exam_number: i32) -> UserProgress {
    UserProgress {
        user_id: user_id.to_string(),
        exam_number,
        completed_questions: 0,
        correct_answers: 0,
        total_attempts: 0,
        total_questions: 0,
        last_updated: Utc::now(),
        topics: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::models::question::{AnalyzedQuestion, QuestionOption, QuestionSource};
    use crate::models::subject::Subject;
    use crate::services::cache::{QuestionCache, SystemClock};
    use crate::services::exam_period_service::ExamPeriodService;

    fn service() -> (ProgressService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ProgressService::new(store.clone()), store)
    }

    fn outcome(completed: u32, correct: u32, total: u32) -> SessionOutcome {
        SessionOutcome {
            completed,
            correct,
            total,
        }
    }

    #[tokio::test]
    async fn first_session_creates_the_aggregate() {
        let (svc, _store) = service();
        assert!(svc.get_progress("u1", 3).await.unwrap().is_none());

        let progress = svc
            .record_session("u1", 3, "wiring", outcome(5, 4, 20), vec!["q1".into()])
            .await
            .unwrap();
        assert_eq!(progress.completed_questions, 5);
        assert_eq!(progress.correct_answers, 4);
        assert_eq!(progress.total_attempts, 1);
        assert_eq!(progress.total_questions, 20);
        assert_eq!(progress.topics["wiring"].completed, 5);
    }

    #[tokio::test]
    async fn completed_questions_never_decrease() {
        let (svc, _store) = service();
        let mut last = 0;
        for (completed, correct, total) in [(3, 1, 10), (0, 0, 10), (7, 7, 12), (1, 0, 8)] {
            let progress = svc
                .record_session("u1", 1, "t", outcome(completed, correct, total), vec![])
                .await
                .unwrap();
            assert!(progress.completed_questions >= last);
            last = progress.completed_questions;
        }
        assert_eq!(last, 11);
    }

    #[tokio::test]
    async fn totals_cap_at_max_seen_instead_of_summing() {
        let (svc, _store) = service();
        svc.record_session("u1", 2, "relays", outcome(5, 3, 20), vec![])
            .await
            .unwrap();
        let progress = svc
            .record_session("u1", 2, "relays", outcome(5, 5, 15), vec![])
            .await
            .unwrap();

        assert_eq!(progress.total_questions, 20);
        let topic = &progress.topics["relays"];
        assert_eq!(topic.total, 20);
        assert_eq!(topic.completed, 10);
        assert_eq!(topic.correct, 8);
    }

    #[tokio::test]
    async fn sessions_are_appended_immutably() {
        let (svc, store) = service();
        svc.record_session("u1", 1, "a", outcome(1, 1, 5), vec!["q1".into()])
            .await
            .unwrap();
        svc.record_session("u1", 1, "a", outcome(2, 1, 5), vec!["q2".into(), "q3".into()])
            .await
            .unwrap();

        let sessions = store
            .query(SESSIONS_COLLECTION, &serde_json::json!({"user_id": "u1"}), None)
            .await
            .unwrap();
        assert_eq!(sessions.len(), 2);
    }

    fn question(correct: &str) -> AnalyzedQuestion {
        AnalyzedQuestion {
            question: "A question long enough to persist?".into(),
            options: vec![
                QuestionOption {
                    id: "A".into(),
                    text: "yes".into(),
                    is_correct: correct == "A",
                },
                QuestionOption {
                    id: "B".into(),
                    text: "no".into(),
                    is_correct: correct == "B",
                },
            ],
            correct_answer: Some(correct.to_string()),
            explanation: None,
            difficulty: None,
            topic: None,
            needs_manual_review: false,
            notes: None,
        }
    }

    #[tokio::test]
    async fn percentage_uses_the_question_inventory() {
        let store = Arc::new(MemoryStore::new());
        let progress_svc = ProgressService::new(store.clone());
        let question_svc = QuestionService::new(
            store.clone(),
            Arc::new(QuestionCache::new(Arc::new(SystemClock))),
            ExamPeriodService::new(store.clone()),
        );

        question_svc
            .save_questions(
                vec![question("A"), question("B"), question("A"), question("B")],
                Subject::Fundamentals,
                "u1",
                3,
                "t",
                QuestionSource::Upload,
            )
            .await
            .unwrap();

        progress_svc
            .record_session("u1", 3, "t", outcome(2, 2, 4), vec![])
            .await
            .unwrap();

        let pct = progress_svc
            .completion_percentage("u1", 3, &question_svc)
            .await;
        assert_eq!(pct, 50);
    }

    #[tokio::test]
    async fn percentage_degrades_to_recorded_total_then_zero() {
        let store = Arc::new(MemoryStore::new());
        let progress_svc = ProgressService::new(store.clone());
        let question_svc = QuestionService::new(
            store.clone(),
            Arc::new(QuestionCache::new(Arc::new(SystemClock))),
            ExamPeriodService::new(store.clone()),
        );

        // No questions persisted: inventory is empty, the aggregate's own
        // total carries the calculation.
        progress_svc
            .record_session("u1", 9, "t", outcome(5, 5, 20), vec![])
            .await
            .unwrap();
        assert_eq!(
            progress_svc.completion_percentage("u1", 9, &question_svc).await,
            25
        );

        // No progress at all: flat zero.
        assert_eq!(
            progress_svc.completion_percentage("nobody", 9, &question_svc).await,
            0
        );
    }

    #[tokio::test]
    async fn percentage_is_capped_at_one_hundred() {
        let store = Arc::new(MemoryStore::new());
        let progress_svc = ProgressService::new(store.clone());
        let question_svc = QuestionService::new(
            store.clone(),
            Arc::new(QuestionCache::new(Arc::new(SystemClock))),
            ExamPeriodService::new(store.clone()),
        );

        progress_svc
            .record_session("u1", 4, "t", outcome(30, 10, 20), vec![])
            .await
            .unwrap();
        assert_eq!(
            progress_svc.completion_percentage("u1", 4, &question_svc).await,
            100
        );
    }
}
