//! In-process document store, used by tests and by local runs without a database.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Collection, DocumentStore, Filter, Page, StoreError, StoreResult, Stored};

#[derive(Clone, Debug)]
struct Entry {
    id: Uuid,
    doc: Value,
    version: i64,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<Collection, Vec<Entry>>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

fn check_unique(entries: &[Entry], collection: Collection, id: Uuid, doc: &Value) -> StoreResult<()> {
    for field in collection.unique_fields() {
        let Some(value) = doc.get(*field).filter(|v| !v.is_null()) else { continue };
        if entries.iter().any(|e| e.id != id && e.doc.get(*field) == Some(value)) {
            return Err(StoreError::Duplicate((*field).to_string()));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: Collection, id: Uuid, doc: Value) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let entries = inner.collections.entry(collection).or_default();
        if entries.iter().any(|e| e.id == id) {
            return Err(StoreError::Duplicate("id".into()));
        }
        check_unique(entries, collection, id, &doc)?;
        entries.push(Entry { id, doc, version: 1, seq });
        Ok(())
    }

    async fn fetch(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Stored>> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(&collection)
            .and_then(|entries| entries.iter().find(|e| e.id == id))
            .map(|e| Stored { doc: e.doc.clone(), version: e.version }))
    }

    async fn find_one(&self, collection: Collection, filter: &Filter) -> StoreResult<Option<Stored>> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(&collection)
            .and_then(|entries| entries.iter().filter(|e| filter.matches(&e.doc)).max_by_key(|e| e.seq))
            .map(|e| Stored { doc: e.doc.clone(), version: e.version }))
    }

    async fn find(&self, collection: Collection, filter: &Filter, page: Page) -> StoreResult<(Vec<Value>, u64)> {
        let inner = self.inner.read().await;
        let Some(entries) = inner.collections.get(&collection) else { return Ok((Vec::new(), 0)) };
        let mut matched: Vec<&Entry> = entries.iter().filter(|e| filter.matches(&e.doc)).collect();
        matched.sort_by(|a, b| b.seq.cmp(&a.seq));
        let total = matched.len() as u64;
        let docs = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|e| e.doc.clone())
            .collect();
        Ok((docs, total))
    }

    async fn swap(&self, collection: Collection, id: Uuid, expected: i64, doc: Value) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(entries) = inner.collections.get_mut(&collection) else { return Ok(false) };
        check_unique(entries, collection, id, &doc)?;
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if entry.version == expected => {
                entry.doc = doc;
                entry.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, collection: Collection, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(entries) = inner.collections.get_mut(&collection) else { return Ok(false) };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_swap_rejects_stale_version() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.insert(Collection::Products, id, json!({"sku": "A"})).await.unwrap();
        assert!(store.swap(Collection::Products, id, 1, json!({"sku": "A", "n": 1})).await.unwrap());
        assert!(!store.swap(Collection::Products, id, 1, json!({"sku": "A", "n": 2})).await.unwrap());
        let stored = store.fetch(Collection::Products, id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.doc["n"], 1);
    }

    #[tokio::test]
    async fn test_unique_fields_enforced() {
        let store = MemoryStore::new();
        store.insert(Collection::Users, Uuid::new_v4(), json!({"email": "a@x.io"})).await.unwrap();
        let err = store.insert(Collection::Users, Uuid::new_v4(), json!({"email": "a@x.io"})).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(f) if f == "email"));
    }

    #[tokio::test]
    async fn test_find_newest_first_with_total() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store.insert(Collection::Media, Uuid::new_v4(), json!({"n": n, "kind": "img"})).await.unwrap();
        }
        let (docs, total) = store
            .find(Collection::Media, &Filter::new().eq("kind", "img"), Page::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["n"], 4);
    }
}
