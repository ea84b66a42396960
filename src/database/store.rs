use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// One stored document: application-assigned id plus schemaless payload.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: JsonValue,
}

/// Narrow interface over the document store. Collections are path-like
/// strings; `query` matches documents whose payload contains every
/// field/value pair of `filter` (equality only — there is no compound
/// filtering beyond that, which is why read paths over-fetch and filter
/// client-side).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, data: JsonValue) -> Result<Document>;
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;
    /// Upsert under a caller-chosen id.
    async fn set(&self, collection: &str, id: &str, data: JsonValue) -> Result<()>;
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;
    async fn query(
        &self,
        collection: &str,
        filter: &JsonValue,
        limit: Option<i64>,
    ) -> Result<Vec<Document>>;
}

/// Drops null object fields recursively before a write; the store rejects
/// them.
pub fn prune_nulls(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune_nulls(v)))
                .collect(),
        ),
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(prune_nulls).collect())
        }
        other => other,
    }
}

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, collection: &str, data: JsonValue) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO documents (id, collection, data) VALUES ($1, $2, $3)")
            .bind(&id)
            .bind(collection)
            .bind(&data)
            .execute(&self.pool)
            .await?;
        Ok(Document { id, data })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Document {
            id: r.get("id"),
            data: r.get("data"),
        }))
    }

    async fn set(&self, collection: &str, id: &str, data: JsonValue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, collection, data) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(id)
        .bind(collection)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &JsonValue,
        limit: Option<i64>,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, data FROM documents
            WHERE collection = $1 AND data @> $2
            ORDER BY created_at
            LIMIT $3
            "#,
        )
        .bind(collection)
        .bind(filter)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Document {
                id: r.get("id"),
                data: r.get("data"),
            })
            .collect())
    }
}
