use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::{DocumentStore, Mutation, Query, StoreError, StoreResult};

/// Postgres backend: one `documents` table, `jsonb` bodies, GIN-indexed.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn any_of_param(query: &Query) -> Option<Value> {
    if query.any_of.is_empty() {
        None
    } else {
        Some(Value::Array(query.any_of.clone()))
    }
}

fn bigint(name: &str, value: u64) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidQuery(format!("{} {} is out of range.", name, value)))
}

fn filter_param(query: &Query) -> Value {
    query
        .filter
        .clone()
        .unwrap_or_else(|| Value::Object(Default::default()))
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO documents (collection, id, doc)
               VALUES ($1, $2, $3)
               ON CONFLICT (collection, id) DO NOTHING"#,
        )
        .bind(collection)
        .bind(id)
        .bind(&doc)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "{} with id '{}' already exists.",
                collection, id
            )));
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let doc = sqlx::query_scalar::<_, Value>(
            "SELECT doc FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let limit = query.limit.map(|l| bigint("Limit", l)).transpose()?;
        let offset = bigint("Offset", query.offset)?;
        let docs = sqlx::query_scalar::<_, Value>(
            r#"SELECT doc FROM documents
               WHERE collection = $1
                 AND doc @> $2
                 AND ($3::jsonb IS NULL
                      OR EXISTS (SELECT 1 FROM jsonb_array_elements($3::jsonb) alt WHERE doc @> alt))
               ORDER BY seq DESC
               LIMIT $4 OFFSET $5"#,
        )
        .bind(collection)
        .bind(filter_param(query))
        .bind(any_of_param(query))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    async fn count(&self, collection: &str, query: &Query) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM documents
               WHERE collection = $1
                 AND doc @> $2
                 AND ($3::jsonb IS NULL
                      OR EXISTS (SELECT 1 FROM jsonb_array_elements($3::jsonb) alt WHERE doc @> alt))"#,
        )
        .bind(collection)
        .bind(filter_param(query))
        .bind(any_of_param(query))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn modify(
        &self,
        collection: &str,
        id: &str,
        mutation: Mutation,
    ) -> StoreResult<Option<Value>> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, Value>(
            "SELECT doc FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut doc) = current else {
            return Ok(None);
        };

        // Dropping `tx` on error rolls back and releases the lock.
        mutation(&mut doc)?;

        let updated = sqlx::query_scalar::<_, Value>(
            r#"UPDATE documents SET doc = $3, updated_at = NOW()
               WHERE collection = $1 AND id = $2
               RETURNING doc"#,
        )
        .bind(collection)
        .bind(id)
        .bind(&doc)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_matching(&self, collection: &str, filter: &Value) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND doc @> $2")
            .bind(collection)
            .bind(filter)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
