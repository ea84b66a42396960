use crate::models::question::StoredQuestion;
use crate::models::subject::Subject;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const KEY_PREFIX: &str = "questions-";
const TTL_HOURS: i64 = 24;

/// Injected time source so TTL behavior is testable against a fixed clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by TTL tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock poisoned");
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    questions: Vec<StoredQuestion>,
    timestamp: DateTime<Utc>,
    subject: Subject,
    user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exam_number: Option<i32>,
}

/// Time-boxed result cache fronting the document store. One instance per
/// application session, injected into the services that need it. Entries
/// are held as serialized JSON; anything that fails to parse back is a miss
/// and gets evicted. The cache is never the source of truth.
pub struct QuestionCache {
    entries: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

fn cache_key(user_id: &str, subject: Subject, exam_number: Option<i32>) -> String {
    match exam_number {
        Some(n) => format!("{}{}-{}-exam{}", KEY_PREFIX, user_id, subject, n),
        None => format!("{}{}-{}", KEY_PREFIX, user_id, subject),
    }
}

impl QuestionCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            ttl: Duration::hours(TTL_HOURS),
            clock,
        }
    }

    pub fn get(
        &self,
        user_id: &str,
        subject: Subject,
        exam_number: Option<i32>,
    ) -> Option<Vec<StoredQuestion>> {
        let key = cache_key(user_id, subject, exam_number);
        let raw = {
            let guard = self.entries.lock().expect("cache poisoned");
            guard.get(&key).cloned()
        }?;

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Evicting unparseable cache entry {}: {}", key, e);
                self.evict(&key);
                return None;
            }
        };

        if entry.user_id != user_id {
            self.evict(&key);
            return None;
        }
        if self.clock.now() - entry.timestamp >= self.ttl {
            self.evict(&key);
            return None;
        }

        Some(entry.questions)
    }

    pub fn put(
        &self,
        user_id: &str,
        subject: Subject,
        exam_number: Option<i32>,
        questions: Vec<StoredQuestion>,
    ) {
        let entry = CacheEntry {
            questions,
            timestamp: self.clock.now(),
            subject,
            user_id: user_id.to_string(),
            exam_number,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to serialize cache entry: {}", e);
                return;
            }
        };
        let key = cache_key(user_id, subject, exam_number);
        let mut guard = self.entries.lock().expect("cache poisoned");
        guard.insert(key, raw);
    }

    pub fn invalidate(&self, user_id: &str, subject: Subject, exam_number: Option<i32>) {
        self.evict(&cache_key(user_id, subject, exam_number));
    }

    pub fn invalidate_all(&self, user_id: &str) {
        let prefix = format!("{}{}-", KEY_PREFIX, user_id);
        let mut guard = self.entries.lock().expect("cache poisoned");
        guard.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Serializes the compound miss path (read store, then repopulate) for
    /// one cache key, so concurrent readers of the same key cannot lose
    /// each other's updates.
    pub async fn key_guard(
        &self,
        user_id: &str,
        subject: Subject,
        exam_number: Option<i32>,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        let key = cache_key(user_id, subject, exam_number);
        let lock = {
            let mut guard = self.locks.lock().expect("cache poisoned");
            guard
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn evict(&self, key: &str) {
        let mut guard = self.entries.lock().expect("cache poisoned");
        guard.remove(key);
    }

    #[cfg(test)]
    fn put_raw(&self, key: &str, raw: &str) {
        let mut guard = self.entries.lock().expect("cache poisoned");
        guard.insert(key.to_string(), raw.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{QuestionOption, QuestionSource, StoredQuestion};

    fn sample_question() -> StoredQuestion {
        StoredQuestion {
            id: "q1".into(),
            question: "What is the nominal mains voltage?".into(),
            options: vec![
                QuestionOption {
                    id: "A".into(),
                    text: "230 V".into(),
                    is_correct: true,
                },
                QuestionOption {
                    id: "B".into(),
                    text: "110 V".into(),
                    is_correct: false,
                },
            ],
            correct_answer: "A".into(),
            explanation: None,
            difficulty: None,
            needs_manual_review: false,
            notes: None,
            subject: Subject::Fundamentals,
            topic_id: "mains".into(),
            exam_period_id: "p1".into(),
            created_at: Utc::now(),
            created_by: "admin".into(),
            source: QuestionSource::Upload,
        }
    }

    fn cache_with_clock() -> (QuestionCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (QuestionCache::new(clock.clone()), clock)
    }

    #[test]
    fn hit_just_before_ttl_miss_just_after() {
        let (cache, clock) = cache_with_clock();
        cache.put("u1", Subject::Fundamentals, Some(3), vec![sample_question()]);

        clock.advance(Duration::hours(TTL_HOURS) - Duration::milliseconds(1));
        assert!(cache.get("u1", Subject::Fundamentals, Some(3)).is_some());

        clock.advance(Duration::milliseconds(2));
        assert!(cache.get("u1", Subject::Fundamentals, Some(3)).is_none());
    }

    #[test]
    fn expired_entry_is_evicted_not_just_skipped() {
        let (cache, clock) = cache_with_clock();
        cache.put("u1", Subject::Practice, None, vec![sample_question()]);
        clock.advance(Duration::hours(TTL_HOURS + 1));
        assert!(cache.get("u1", Subject::Practice, None).is_none());

        // A later read within a fresh TTL window still misses: the entry is
        // gone, not resurrected.
        assert!(cache.get("u1", Subject::Practice, None).is_none());
    }

    #[test]
    fn entries_are_user_isolated() {
        let (cache, _clock) = cache_with_clock();
        cache.put("alice", Subject::Regulations, Some(1), vec![sample_question()]);
        assert!(cache.get("bob", Subject::Regulations, Some(1)).is_none());
        assert!(cache.get("alice", Subject::Regulations, Some(1)).is_some());
    }

    #[test]
    fn mismatched_owner_inside_entry_is_a_miss() {
        let (cache, _clock) = cache_with_clock();
        cache.put("alice", Subject::Technology, None, vec![sample_question()]);

        // Forge the key collision the isolation invariant guards against.
        let raw = {
            let guard = cache.entries.lock().unwrap();
            guard.get("questions-alice-technology").cloned().unwrap()
        };
        cache.put_raw("questions-bob-technology", &raw);

        assert!(cache.get("bob", Subject::Technology, None).is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss_and_evicted() {
        let (cache, _clock) = cache_with_clock();
        cache.put_raw("questions-u1-fundamentals", "{not valid json");
        assert!(cache.get("u1", Subject::Fundamentals, None).is_none());
        let guard = cache.entries.lock().unwrap();
        assert!(!guard.contains_key("questions-u1-fundamentals"));
    }

    #[test]
    fn invalidate_all_only_touches_one_user() {
        let (cache, _clock) = cache_with_clock();
        cache.put("u1", Subject::Fundamentals, Some(1), vec![sample_question()]);
        cache.put("u1", Subject::Practice, None, vec![sample_question()]);
        cache.put("u2", Subject::Fundamentals, Some(1), vec![sample_question()]);

        cache.invalidate_all("u1");

        assert!(cache.get("u1", Subject::Fundamentals, Some(1)).is_none());
        assert!(cache.get("u1", Subject::Practice, None).is_none());
        assert!(cache.get("u2", Subject::Fundamentals, Some(1)).is_some());
    }
}
