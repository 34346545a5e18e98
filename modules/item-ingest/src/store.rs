//! Document store for ingested items
//!
//! One logical record per item id. Writes are shallow merge-upserts: a later
//! write for the same id overwrites only the top-level fields it supplies,
//! which is what turns at-least-once delivery into effectively-once storage.
//! The writer has no retry loop of its own: a failed write surfaces as
//! `StoreError` and the channel's redelivery is the only retry mechanism.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// Errors that can occur against the document store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("document write rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Merge-write a document keyed by the item id
    ///
    /// Creates the document if absent; otherwise overwrites only the
    /// top-level fields present in `document`, preserving the rest.
    /// `document` must be a JSON object.
    async fn upsert_merge(&self, item_id: &str, document: Value) -> Result<(), StoreError>;

    /// Point read of one document (tests and operator tooling, not the
    /// ingest hot path)
    async fn fetch(&self, item_id: &str) -> Result<Option<Value>, StoreError>;

    /// Cheap reachability probe for readiness checks; never mutates state
    async fn ping(&self) -> Result<(), StoreError>;
}

impl fmt::Debug for dyn ItemStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemStore")
    }
}

fn classify(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) => StoreError::Rejected(db.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

/// ItemStore implementation backed by Postgres
///
/// Documents live in an `items` table with a JSONB `doc` column; the merge is
/// Postgres's own `||` object concatenation, so concurrent writers for the
/// same id converge per field without cross-handler locking.
#[derive(Clone)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn upsert_merge(&self, item_id: &str, document: Value) -> Result<(), StoreError> {
        if !document.is_object() {
            return Err(StoreError::Rejected("document must be a JSON object".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO items (item_id, doc, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (item_id) DO UPDATE
            SET doc = items.doc || EXCLUDED.doc,
                updated_at = NOW()
            "#,
        )
        .bind(item_id)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn fetch(&self, item_id: &str) -> Result<Option<Value>, StoreError> {
        let doc: Option<Value> = sqlx::query_scalar(
            r#"
            SELECT doc FROM items
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(doc)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// ItemStore implementation backed by a process-local map
///
/// Suitable for unit/pipeline tests and local development without Docker.
/// Implements the same shallow merge law as the Postgres store.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Map<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn upsert_merge(&self, item_id: &str, document: Value) -> Result<(), StoreError> {
        let Value::Object(fields) = document else {
            return Err(StoreError::Rejected("document must be a JSON object".to_string()));
        };

        let mut docs = self.docs.write().await;
        let entry = docs.entry(item_id.to_string()).or_default();
        for (key, value) in fields {
            entry.insert(key, value);
        }
        Ok(())
    }

    async fn fetch(&self, item_id: &str) -> Result<Option<Value>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.get(item_id).cloned().map(Value::Object))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
