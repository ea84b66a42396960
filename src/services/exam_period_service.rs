use crate::database::store::{Document, DocumentStore};
use crate::error::{Error, Result};
use crate::models::exam_period::ExamPeriod;
use chrono::{Datelike, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const COLLECTION: &str = "exam_periods";
const CREATE_ATTEMPTS: usize = 3;
const RETRY_BACKOFF_MS: u64 = 250;

/// Keeps (created_by, exam_number, year) unique over a store that cannot.
/// The store only supports query-then-write, so uniqueness is approximated
/// with a sweep, an existence check and a bounded create-retry loop; a
/// short-lived duplicate window is tolerated and reconciled, not prevented.
#[derive(Clone)]
pub struct ExamPeriodService {
    store: Arc<dyn DocumentStore>,
}

impl ExamPeriodService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(&self, user_id: &str, exam_number: i32) -> Result<ExamPeriod> {
        self.get_or_create_in_year(user_id, exam_number, Utc::now().year())
            .await
    }

    pub async fn get_or_create_in_year(
        &self,
        user_id: &str,
        exam_number: i32,
        year: i32,
    ) -> Result<ExamPeriod> {
        self.cleanup_duplicates(user_id, exam_number, year).await?;

        if let Some(existing) = self.find_earliest(user_id, exam_number, year).await? {
            return Ok(existing);
        }

        let mut last_error: Option<Error> = None;
        for attempt in 1..=CREATE_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                    .await;
                // A concurrent writer may have won the race in the meantime.
                if let Some(existing) = self.find_earliest(user_id, exam_number, year).await? {
                    return Ok(existing);
                }
            }

            let data = json!({
                "name": ExamPeriod::display_name(exam_number, year),
                "exam_number": exam_number,
                "year": year,
                "created_by": user_id,
                "created_at": Utc::now(),
            });
            match self.store.insert(COLLECTION, data).await {
                Ok(doc) => return decode_period(&doc),
                Err(e) => {
                    tracing::warn!(
                        "Exam period create attempt {}/{} failed for user={} exam={}: {}",
                        attempt,
                        CREATE_ATTEMPTS,
                        user_id,
                        exam_number,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        // Creation kept failing; a competing writer may still have left us
        // a usable record.
        if let Some(existing) = self.find_earliest(user_id, exam_number, year).await? {
            return Ok(existing);
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Internal(format!(
                "Could not create exam period for user={} exam={}",
                user_id, exam_number
            ))
        }))
    }

    /// Read-only lookup used by paths that must not have side effects; when
    /// duplicates exist it picks the earliest but deletes nothing.
    pub async fn get_existing(
        &self,
        user_id: &str,
        exam_number: i32,
    ) -> Result<Option<ExamPeriod>> {
        self.get_existing_in_year(user_id, exam_number, Utc::now().year())
            .await
    }

    pub async fn get_existing_in_year(
        &self,
        user_id: &str,
        exam_number: i32,
        year: i32,
    ) -> Result<Option<ExamPeriod>> {
        self.find_earliest(user_id, exam_number, year).await
    }

    /// Deletes all but the earliest period for the tuple. Returns how many
    /// records were removed.
    pub async fn cleanup_duplicates(
        &self,
        user_id: &str,
        exam_number: i32,
        year: i32,
    ) -> Result<usize> {
        let mut periods = self.fetch_all(user_id, exam_number, year).await?;
        if periods.len() <= 1 {
            return Ok(0);
        }

        periods.sort_by_key(|p| p.created_at);
        let survivor = periods.remove(0);
        let mut removed = 0;
        for duplicate in periods {
            tracing::warn!(
                "Removing duplicate exam period {} (kept {})",
                duplicate.id,
                survivor.id
            );
            self.store.delete(COLLECTION, &duplicate.id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn fetch_all(
        &self,
        user_id: &str,
        exam_number: i32,
        year: i32,
    ) -> Result<Vec<ExamPeriod>> {
        let filter = json!({
            "created_by": user_id,
            "exam_number": exam_number,
            "year": year,
        });
        let docs = self.store.query(COLLECTION, &filter, None).await?;
        docs.iter().map(decode_period).collect()
    }

    async fn find_earliest(
        &self,
        user_id: &str,
        exam_number: i32,
        year: i32,
    ) -> Result<Option<ExamPeriod>> {
        let mut periods = self.fetch_all(user_id, exam_number, year).await?;
        periods.sort_by_key(|p| p.created_at);
        Ok(periods.into_iter().next())
    }
}

fn decode_period(doc: &Document) -> Result<ExamPeriod> {
    let mut period: ExamPeriod = serde_json::from_value(doc.data.clone())?;
    period.id = doc.id.clone();
    Ok(period)
}
