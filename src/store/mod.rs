//! Document persistence.
//!
//! Every entity is a JSON document stored in a named collection. Queries are
//! expressed as JSON containment filters (`doc @> filter`), which both the
//! Postgres (`jsonb`) and the in-memory backend evaluate the same way.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Conflict(String),

    /// Paging or filter values the backend cannot represent.
    #[error("{0}")]
    InvalidQuery(String),

    /// A mutation refused to apply to the current document state.
    #[error("{path}: {message}")]
    Rejected { path: String, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A persisted entity.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Selection of documents in a collection, newest first.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Documents must contain this value.
    pub filter: Option<Value>,
    /// If non-empty, documents must additionally contain at least one of these.
    pub any_of: Vec<Value>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Query {
    pub fn filter(filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }

    pub fn any_of(mut self, alternatives: Vec<Value>) -> Self {
        self.any_of = alternatives;
        self
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// The same selection without paging, for counting.
    pub fn unpaged(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            any_of: self.any_of.clone(),
            limit: None,
            offset: 0,
        }
    }
}

/// In-place edit of a raw document, applied atomically by the backend.
pub type Mutation = Box<dyn FnOnce(&mut Value) -> StoreResult<()> + Send>;

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Inserts a new document. Fails with `Conflict` if the id is taken.
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>>;

    async fn count(&self, collection: &str, query: &Query) -> StoreResult<u64>;

    /// Applies `mutation` under a row lock and returns the document as
    /// re-read after the update, or `None` if it does not exist.
    async fn modify(
        &self,
        collection: &str,
        id: &str,
        mutation: Mutation,
    ) -> StoreResult<Option<Value>>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    async fn delete_matching(&self, collection: &str, filter: &Value) -> StoreResult<u64>;
}

/// PostgreSQL `@>` semantics for JSON values.
pub fn contains(doc: &Value, filter: &Value) -> bool {
    match (doc, filter) {
        (Value::Object(d), Value::Object(f)) => f
            .iter()
            .all(|(k, fv)| d.get(k).map_or(false, |dv| contains(dv, fv))),
        (Value::Array(d), Value::Array(f)) => {
            f.iter().all(|fv| d.iter().any(|dv| contains(dv, fv)))
        }
        (d, f) => d == f,
    }
}

/// Handle to the configured backend.
#[derive(Clone)]
pub struct Db {
    store: Arc<dyn DocumentStore>,
}

impl Db {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn repo<T: Document>(&self) -> Repo<T> {
        Repo {
            store: self.store.clone(),
            _doc: PhantomData,
        }
    }

    pub fn relations<R: Relation>(&self) -> RelationRepo<R> {
        RelationRepo { repo: self.repo() }
    }
}

/// Typed access to one collection.
pub struct Repo<T> {
    store: Arc<dyn DocumentStore>,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Document> Repo<T> {
    pub async fn insert(&self, doc: &T) -> StoreResult<()> {
        let value = serde_json::to_value(doc)?;
        self.store.insert(T::COLLECTION, doc.id(), value).await
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<T>> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub async fn find(&self, query: &Query) -> StoreResult<Vec<T>> {
        self.store
            .find(T::COLLECTION, query)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    pub async fn find_one(&self, filter: Value) -> StoreResult<Option<T>> {
        let query = Query::filter(filter).page(0, 1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    pub async fn count(&self, query: &Query) -> StoreResult<u64> {
        self.store.count(T::COLLECTION, &query.unpaged()).await
    }

    /// Applies `f` atomically and returns the updated document.
    pub async fn modify<F>(&self, id: &str, f: F) -> StoreResult<Option<T>>
    where
        F: FnOnce(&mut T) -> StoreResult<()> + Send + 'static,
    {
        let mutation: Mutation = Box::new(move |raw: &mut Value| {
            let mut doc: T = serde_json::from_value(raw.clone())?;
            f(&mut doc)?;
            *raw = serde_json::to_value(&doc)?;
            Ok(())
        });
        match self.store.modify(T::COLLECTION, id, mutation).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(T::COLLECTION, id).await
    }

    pub async fn delete_matching(&self, filter: Value) -> StoreResult<u64> {
        self.store.delete_matching(T::COLLECTION, &filter).await
    }
}

/// A per-user relation to some target entity (a rating, a star).
///
/// At most one relation exists per (target, user): the document id is
/// derived from both, so a duplicate insert is rejected by the backend.
pub trait Relation: Document {
    type Target: Serialize + Send + Sync;

    fn relation_id(target: &Self::Target, user_id: &str) -> String;

    /// Containment filter selecting all relations on `target`.
    fn target_filter(target: &Self::Target) -> Value;
}

pub struct RelationRepo<R> {
    repo: Repo<R>,
}

impl<R: Relation> RelationRepo<R> {
    pub async fn find(&self, target: &R::Target, user_id: &str) -> StoreResult<Option<R>> {
        self.repo.get(&R::relation_id(target, user_id)).await
    }

    pub async fn insert(&self, relation: &R) -> StoreResult<()> {
        self.repo.insert(relation).await
    }

    pub async fn modify<F>(&self, target: &R::Target, user_id: &str, f: F) -> StoreResult<Option<R>>
    where
        F: FnOnce(&mut R) -> StoreResult<()> + Send + 'static,
    {
        self.repo.modify(&R::relation_id(target, user_id), f).await
    }

    pub async fn delete(&self, target: &R::Target, user_id: &str) -> StoreResult<bool> {
        self.repo.delete(&R::relation_id(target, user_id)).await
    }

    pub async fn delete_for(&self, target: &R::Target) -> StoreResult<u64> {
        self.repo.delete_matching(R::target_filter(target)).await
    }
}
