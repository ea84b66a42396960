use crate::database::store::{Document, DocumentStore};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// In-process document store with the same containment-query semantics as
/// the Postgres implementation. Backs tests and local development; like the
/// real store it enforces no uniqueness beyond the document id.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains(data: &JsonValue, filter: &JsonValue) -> bool {
    match filter.as_object() {
        Some(fields) => fields
            .iter()
            .all(|(k, v)| data.get(k).map(|d| d == v).unwrap_or(false)),
        None => true,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, data: JsonValue) -> Result<Document> {
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            data,
        };
        let mut guard = self.collections.lock().expect("memory store poisoned");
        guard
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let guard = self.collections.lock().expect("memory store poisoned");
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, data: JsonValue) -> Result<()> {
        let mut guard = self.collections.lock().expect("memory store poisoned");
        let docs = guard.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.data = data,
            None => docs.push(Document {
                id: id.to_string(),
                data,
            }),
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut guard = self.collections.lock().expect("memory store poisoned");
        if let Some(docs) = guard.get_mut(collection) {
            docs.retain(|d| d.id != id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &JsonValue,
        limit: Option<i64>,
    ) -> Result<Vec<Document>> {
        let guard = self.collections.lock().expect("memory store poisoned");
        let mut matched: Vec<Document> = guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| contains(&d.data, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(limit) = limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }
}
