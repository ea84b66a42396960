use crate::database::store::{prune_nulls, Document, DocumentStore};
use crate::error::{Error, Result};
use crate::models::question::{AnalyzedQuestion, QuestionSource, StoredQuestion};
use crate::models::subject::Subject;
use crate::services::cache::QuestionCache;
use crate::services::exam_period_service::ExamPeriodService;
use crate::services::normalizer;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;

const FLAT_COLLECTION: &str = "questions";

fn structured_collection(period_id: &str, subject: Subject) -> String {
    format!("exam_periods/{}/{}", period_id, subject.collection_key())
}

#[derive(Debug, Default, serde::Serialize)]
pub struct SaveReport {
    pub saved: usize,
    pub fallback: usize,
    pub failed: usize,
    /// Candidates dropped before writing because they failed validation.
    pub rejected: usize,
    pub exam_period_id: String,
}

enum WriteOutcome {
    Structured,
    Fallback,
    Failed,
}

/// Writes validated question batches under exam period / subject and serves
/// the cache-first read path.
#[derive(Clone)]
pub struct QuestionService {
    store: Arc<dyn DocumentStore>,
    cache: Arc<QuestionCache>,
    periods: ExamPeriodService,
}

impl QuestionService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<QuestionCache>,
        periods: ExamPeriodService,
    ) -> Self {
        Self {
            store,
            cache,
            periods,
        }
    }

    /// Persists a confirmed batch. The exam period is resolved before any
    /// question write; per-question writes run concurrently and
    /// independently — this is not a transaction, and partial failure shows
    /// up in the report instead of rolling anything back.
    pub async fn save_questions(
        &self,
        questions: Vec<AnalyzedQuestion>,
        subject: Subject,
        user_id: &str,
        exam_number: i32,
        topic_id: &str,
        source: QuestionSource,
    ) -> Result<SaveReport> {
        let period = self.periods.get_or_create(user_id, exam_number).await?;

        let mut report = SaveReport {
            exam_period_id: period.id.clone(),
            ..Default::default()
        };

        let now = Utc::now();
        let mut records = Vec::new();
        for q in questions {
            if !normalizer::validate_question(&q) {
                report.rejected += 1;
                continue;
            }
            let correct_answer = match &q.correct_answer {
                Some(ans) if q.options.iter().any(|o| &o.id == ans) => ans.clone(),
                // Unresolvable at write time: exclude rather than guess.
                _ => {
                    report.rejected += 1;
                    continue;
                }
            };
            records.push(StoredQuestion {
                id: String::new(),
                question: q.question,
                options: q.options,
                correct_answer,
                explanation: q.explanation,
                difficulty: q.difficulty,
                needs_manual_review: q.needs_manual_review,
                notes: q.notes,
                subject,
                topic_id: topic_id.to_string(),
                exam_period_id: period.id.clone(),
                created_at: now,
                created_by: user_id.to_string(),
                source,
            });
        }

        let outcomes = join_all(records.iter().map(|record| self.write_question(record))).await;

        for outcome in outcomes {
            match outcome {
                WriteOutcome::Structured => report.saved += 1,
                WriteOutcome::Fallback => report.fallback += 1,
                WriteOutcome::Failed => report.failed += 1,
            }
        }

        if report.saved + report.fallback > 0 {
            // Correctness over freshness: drop both key shapes for this
            // user/subject.
            self.cache.invalidate(user_id, subject, Some(exam_number));
            self.cache.invalidate(user_id, subject, None);
        }

        if !records.is_empty() && report.saved + report.fallback == 0 {
            return Err(Error::Internal(format!(
                "All {} question writes failed for exam period {}",
                report.failed, period.id
            )));
        }

        Ok(report)
    }

    async fn write_question(&self, record: &StoredQuestion) -> WriteOutcome {
        let data = match serde_json::to_value(record) {
            Ok(value) => prune_nulls(value),
            Err(e) => {
                tracing::error!("Failed to serialize question: {}", e);
                return WriteOutcome::Failed;
            }
        };

        let collection = structured_collection(&record.exam_period_id, record.subject);
        match self.store.insert(&collection, data.clone()).await {
            Ok(_) => WriteOutcome::Structured,
            Err(structured_err) => {
                tracing::warn!(
                    "Structured write to {} failed ({}), falling back to flat collection",
                    collection,
                    structured_err
                );
                let mut flat = data;
                flat["subject_collection"] = json!(record.subject.collection_key());
                match self.store.insert(FLAT_COLLECTION, flat).await {
                    Ok(_) => WriteOutcome::Fallback,
                    Err(flat_err) => {
                        tracing::error!(
                            "Flat-collection fallback also failed: {}",
                            flat_err
                        );
                        WriteOutcome::Failed
                    }
                }
            }
        }
    }

    /// Cache-first read. A missing exam period means "no questions yet",
    /// not an error. The store cannot filter by topic, so the read
    /// over-fetches (limit × 2), filters client-side, and repopulates the
    /// cache with the unfiltered exam-level set so other topic queries can
    /// reuse it.
    pub async fn read_questions(
        &self,
        exam_number: i32,
        subject: Subject,
        topic_id: Option<&str>,
        limit: usize,
        user_id: &str,
        use_cache: bool,
    ) -> Result<Vec<StoredQuestion>> {
        // Serialize the miss path per key so concurrent readers cannot
        // interleave read-then-populate.
        let _guard = self.cache.key_guard(user_id, subject, Some(exam_number)).await;

        if use_cache {
            if let Some(cached) = self.cache.get(user_id, subject, Some(exam_number)) {
                return Ok(filter_by_topic(cached, topic_id, limit));
            }
        }

        let Some(period) = self.periods.get_existing(user_id, exam_number).await? else {
            return Ok(Vec::new());
        };

        let fetch_limit = (limit.max(1) * 2) as i64;
        let collection = structured_collection(&period.id, subject);
        let mut docs = self.store.query(&collection, &json!({}), Some(fetch_limit)).await?;
        if docs.is_empty() {
            docs = self
                .store
                .query(
                    FLAT_COLLECTION,
                    &json!({
                        "exam_period_id": period.id,
                        "subject_collection": subject.collection_key(),
                    }),
                    Some(fetch_limit),
                )
                .await?;
        }

        let questions = decode_questions(&docs);
        self.cache
            .put(user_id, subject, Some(exam_number), questions.clone());

        Ok(filter_by_topic(questions, topic_id, limit))
    }

    /// Total question inventory for an exam across all subjects — the
    /// denominator of the completion percentage.
    pub async fn count_questions(&self, user_id: &str, exam_number: i32) -> Result<usize> {
        let Some(period) = self.periods.get_existing(user_id, exam_number).await? else {
            return Ok(0);
        };

        let mut total = 0;
        for subject in Subject::ALL {
            let collection = structured_collection(&period.id, subject);
            total += self.store.query(&collection, &json!({}), None).await?.len();
        }
        total += self
            .store
            .query(FLAT_COLLECTION, &json!({"exam_period_id": period.id}), None)
            .await?
            .len();
        Ok(total)
    }
}

/// Quiz delivery excludes questions whose answer key was never confidently
/// resolved.
pub fn gradeable(questions: Vec<StoredQuestion>) -> Vec<StoredQuestion> {
    questions
        .into_iter()
        .filter(|q| !q.needs_manual_review)
        .collect()
}

fn filter_by_topic(
    questions: Vec<StoredQuestion>,
    topic_id: Option<&str>,
    limit: usize,
) -> Vec<StoredQuestion> {
    questions
        .into_iter()
        .filter(|q| topic_id.map(|t| q.topic_id == t).unwrap_or(true))
        .take(limit)
        .collect()
}

fn decode_questions(docs: &[Document]) -> Vec<StoredQuestion> {
    docs.iter()
        .filter_map(|doc| {
            match serde_json::from_value::<StoredQuestion>(doc.data.clone()) {
                Ok(mut q) => {
                    q.id = doc.id.clone();
                    Some(q)
                }
                Err(e) => {
                    tracing::warn!("Skipping undecodable question {}: {}", doc.id, e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::models::question::QuestionOption;
    use crate::services::cache::SystemClock;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    fn analyzed(text: &str, correct: &str, flagged: bool) -> AnalyzedQuestion {
        AnalyzedQuestion {
            question: text.to_string(),
            options: vec![
                QuestionOption {
                    id: "A".into(),
                    text: "first".into(),
                    is_correct: correct == "A",
                },
                QuestionOption {
                    id: "B".into(),
                    text: "second".into(),
                    is_correct: correct == "B",
                },
            ],
            correct_answer: Some(correct.to_string()),
            explanation: None,
            difficulty: None,
            topic: None,
            needs_manual_review: flagged,
            notes: None,
        }
    }

    fn build(store: Arc<dyn DocumentStore>) -> QuestionService {
        let cache = Arc::new(QuestionCache::new(Arc::new(SystemClock)));
        let periods = ExamPeriodService::new(store.clone());
        QuestionService::new(store, cache, periods)
    }

    #[tokio::test]
    async fn saved_questions_round_trip_through_read() {
        let svc = build(Arc::new(MemoryStore::new()));

        let report = svc
            .save_questions(
                vec![analyzed("Which wire gauge suits a 16 A circuit?", "B", false)],
                Subject::Fundamentals,
                "admin",
                3,
                "wiring",
                QuestionSource::Upload,
            )
            .await
            .unwrap();
        assert_eq!(report.saved, 1);
        assert_eq!(report.failed, 0);

        let questions = svc
            .read_questions(3, Subject::Fundamentals, Some("wiring"), 10, "admin", true)
            .await
            .unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question, "Which wire gauge suits a 16 A circuit?");
        assert_eq!(questions[0].correct_answer, "B");
        assert_eq!(questions[0].options.len(), 2);
    }

    #[tokio::test]
    async fn topic_filter_works_off_the_shared_exam_cache() {
        let svc = build(Arc::new(MemoryStore::new()));
        svc.save_questions(
            vec![analyzed("Question about breakers, long enough?", "A", false)],
            Subject::Technology,
            "admin",
            1,
            "breakers",
            QuestionSource::Upload,
        )
        .await
        .unwrap();
        svc.save_questions(
            vec![analyzed("Question about relays, long enough?", "A", false)],
            Subject::Technology,
            "admin",
            1,
            "relays",
            QuestionSource::Upload,
        )
        .await
        .unwrap();

        // First read populates the cache with the unfiltered exam set.
        let breakers = svc
            .read_questions(1, Subject::Technology, Some("breakers"), 10, "admin", true)
            .await
            .unwrap();
        assert_eq!(breakers.len(), 1);

        // Second topic reuses the cached exam-level set.
        let relays = svc
            .read_questions(1, Subject::Technology, Some("relays"), 10, "admin", true)
            .await
            .unwrap();
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].topic_id, "relays");
    }

    #[tokio::test]
    async fn save_invalidates_the_cached_exam_set() {
        let svc = build(Arc::new(MemoryStore::new()));
        svc.save_questions(
            vec![analyzed("First persisted question, right?", "A", false)],
            Subject::Practice,
            "admin",
            2,
            "safety",
            QuestionSource::Upload,
        )
        .await
        .unwrap();

        let before = svc
            .read_questions(2, Subject::Practice, None, 10, "admin", true)
            .await
            .unwrap();
        assert_eq!(before.len(), 1);

        svc.save_questions(
            vec![analyzed("Second persisted question, right?", "B", false)],
            Subject::Practice,
            "admin",
            2,
            "safety",
            QuestionSource::Upload,
        )
        .await
        .unwrap();

        let after = svc
            .read_questions(2, Subject::Practice, None, 10, "admin", true)
            .await
            .unwrap();
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn unresolvable_answers_are_rejected_not_written() {
        let svc = build(Arc::new(MemoryStore::new()));
        let mut bad = analyzed("Valid text but broken answer key?", "A", false);
        bad.correct_answer = Some("Z".into());

        let report = svc
            .save_questions(
                vec![bad],
                Subject::Regulations,
                "admin",
                4,
                "norms",
                QuestionSource::Manual,
            )
            .await
            .unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.saved, 0);
    }

    #[tokio::test]
    async fn gradeable_excludes_flagged_questions() {
        let svc = build(Arc::new(MemoryStore::new()));
        svc.save_questions(
            vec![
                analyzed("Resolved question with a real key?", "A", false),
                analyzed("Question whose key was guessed at?", "A", true),
            ],
            Subject::Fundamentals,
            "admin",
            6,
            "t",
            QuestionSource::Upload,
        )
        .await
        .unwrap();

        let all = svc
            .read_questions(6, Subject::Fundamentals, None, 10, "admin", true)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        let deliverable = gradeable(all);
        assert_eq!(deliverable.len(), 1);
        assert!(!deliverable[0].needs_manual_review);
    }

    #[tokio::test]
    async fn count_spans_all_subjects() {
        let svc = build(Arc::new(MemoryStore::new()));
        for subject in [Subject::Fundamentals, Subject::Practice] {
            svc.save_questions(
                vec![analyzed("Counting question for inventory?", "A", false)],
                subject,
                "admin",
                8,
                "t",
                QuestionSource::Upload,
            )
            .await
            .unwrap();
        }
        assert_eq!(svc.count_questions("admin", 8).await.unwrap(), 2);
        assert_eq!(svc.count_questions("admin", 99).await.unwrap(), 0);
    }

    /// Store that rejects structured-path writes, to exercise the flat
    /// fallback.
    struct StructuredWriteFails {
        inner: MemoryStore,
    }

    #[async_trait]
    impl DocumentStore for StructuredWriteFails {
        async fn insert(&self, collection: &str, data: JsonValue) -> crate::error::Result<Document> {
            if collection.starts_with("exam_periods/") {
                return Err(Error::Internal("index requirement not met".into()));
            }
            self.inner.insert(collection, data).await
        }
        async fn get(&self, collection: &str, id: &str) -> crate::error::Result<Option<Document>> {
            self.inner.get(collection, id).await
        }
        async fn set(&self, collection: &str, id: &str, data: JsonValue) -> crate::error::Result<()> {
            self.inner.set(collection, id, data).await
        }
        async fn delete(&self, collection: &str, id: &str) -> crate::error::Result<()> {
            self.inner.delete(collection, id).await
        }
        async fn query(
            &self,
            collection: &str,
            filter: &JsonValue,
            limit: Option<i64>,
        ) -> crate::error::Result<Vec<Document>> {
            self.inner.query(collection, filter, limit).await
        }
    }

    #[tokio::test]
    async fn structured_failure_falls_back_to_flat_collection() {
        let svc = build(Arc::new(StructuredWriteFails {
            inner: MemoryStore::new(),
        }));

        let report = svc
            .save_questions(
                vec![analyzed("Does the fallback path keep this?", "B", false)],
                Subject::Technology,
                "admin",
                5,
                "fallback",
                QuestionSource::Upload,
            )
            .await
            .unwrap();
        assert_eq!(report.saved, 0);
        assert_eq!(report.fallback, 1);

        let questions = svc
            .read_questions(5, Subject::Technology, Some("fallback"), 10, "admin", true)
            .await
            .unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_answer, "B");
    }
}
