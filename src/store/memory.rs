//! In-memory document store for tests and `serve --in-memory`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{contains, DocumentStore, Mutation, Query, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    id: String,
    doc: Value,
}

/// Collections keyed by name. A collection's entries live behind one
/// `DashMap` shard lock, so `modify` is atomic with respect to other writers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Entry>>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(entry: &Entry, query: &Query) -> bool {
        let base = query
            .filter
            .as_ref()
            .map_or(true, |f| contains(&entry.doc, f));
        base && (query.any_of.is_empty()
            || query.any_of.iter().any(|alt| contains(&entry.doc, alt)))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        let mut entries = self.collections.entry(collection.to_string()).or_default();
        if entries.iter().any(|e| e.id == id) {
            return Err(StoreError::Conflict(format!(
                "{} with id '{}' already exists.",
                collection, id
            )));
        }
        entries.push(Entry {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            id: id.to_string(),
            doc,
        });
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|entries| entries.iter().find(|e| e.id == id).map(|e| e.doc.clone())))
    }

    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let Some(entries) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<&Entry> = entries.iter().filter(|e| Self::matches(e, query)).collect();
        matched.sort_by(|a, b| b.seq.cmp(&a.seq));
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.doc.clone())
            .collect())
    }

    async fn count(&self, collection: &str, query: &Query) -> StoreResult<u64> {
        Ok(self.collections.get(collection).map_or(0, |entries| {
            entries.iter().filter(|e| Self::matches(e, query)).count() as u64
        }))
    }

    async fn modify(
        &self,
        collection: &str,
        id: &str,
        mutation: Mutation,
    ) -> StoreResult<Option<Value>> {
        let Some(mut entries) = self.collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };
        let mut doc = entry.doc.clone();
        mutation(&mut doc)?;
        entry.doc = doc;
        Ok(Some(entry.doc.clone()))
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let Some(mut entries) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < before)
    }

    async fn delete_matching(&self, collection: &str, filter: &Value) -> StoreResult<u64> {
        let Some(mut entries) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|e| !contains(&e.doc, filter));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = MemoryStore::new();
        store.insert("games", "g1", json!({"id": "g1"})).await.unwrap();
        let err = store.insert("games", "g1", json!({"id": "g1"})).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_is_newest_first_and_paged() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let id = format!("g{}", i);
            store.insert("games", &id, json!({"id": id, "kind": "ss"})).await.unwrap();
        }
        let page = store
            .find("games", &Query::filter(json!({"kind": "ss"})).page(1, 2))
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["g3", "g2"]);
        assert_eq!(store.count("games", &Query::default()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_any_of_is_disjunction() {
        let store = MemoryStore::new();
        store.insert("events", "e1", json!({"event": "a"})).await.unwrap();
        store.insert("events", "e2", json!({"event": "b"})).await.unwrap();
        store.insert("events", "e3", json!({"event": "c"})).await.unwrap();
        let q = Query::default().any_of(vec![json!({"event": "a"}), json!({"event": "c"})]);
        assert_eq!(store.count("events", &q).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_document_untouched() {
        let store = MemoryStore::new();
        store.insert("games", "g1", json!({"id": "g1", "n": 1})).await.unwrap();
        let result = store
            .modify(
                "games",
                "g1",
                Box::new(|doc: &mut Value| {
                    doc["n"] = json!(2);
                    Err(StoreError::Rejected {
                        path: "n".into(),
                        message: "nope".into(),
                    })
                }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.get("games", "g1").await.unwrap().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let store = MemoryStore::new();
        store.insert("stars", "s1", json!({"target": {"kind": "game", "id": "g1"}})).await.unwrap();
        store.insert("stars", "s2", json!({"target": {"kind": "game", "id": "g2"}})).await.unwrap();
        let n = store
            .delete_matching("stars", &json!({"target": {"id": "g1"}}))
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert!(store.get("stars", "s2").await.unwrap().is_some());
    }
}
