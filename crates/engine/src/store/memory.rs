//! In-process [`DocumentStore`].

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{EngineError, ResultEngine};

use super::{BatchOp, Document, DocumentStore, Fields, Query, WriteBatch, new_id};

const DEFAULT_BATCH_LIMIT: usize = 500;

#[derive(Debug, Default)]
struct Collections {
    next_seq: u64,
    /// collection -> id -> (insertion sequence, fields)
    docs: HashMap<String, HashMap<String, (u64, Fields)>>,
}

impl Collections {
    fn insert(&mut self, collection: &str, id: String, fields: Fields) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.docs
            .entry(collection.to_string())
            .or_default()
            .insert(id, (seq, fields));
    }

    fn contains(&self, collection: &str, id: &str) -> bool {
        self.docs
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id))
    }

    fn merge(&mut self, collection: &str, id: &str, fields: Fields) -> ResultEngine<()> {
        let (_, existing) = self
            .docs
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| EngineError::KeyNotFound(format!("{collection}/{id}")))?;
        existing.extend(fields);
        Ok(())
    }

    fn remove(&mut self, collection: &str, id: &str) -> ResultEngine<()> {
        self.docs
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .map(|_| ())
            .ok_or_else(|| EngineError::KeyNotFound(format!("{collection}/{id}")))
    }
}

/// Documents kept in a mutex-guarded map. Cheap to build, used by tests and by
/// the `memory` database setting.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
    batch_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_batch_limit(DEFAULT_BATCH_LIMIT)
    }

    #[must_use]
    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Collections::default()),
            batch_limit,
        }
    }

    fn lock(&self) -> ResultEngine<MutexGuard<'_, Collections>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Store("memory store lock poisoned".to_string()))
    }

    /// Number of documents in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.lock()
            .map(|inner| inner.docs.get(collection).map_or(0, HashMap::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> ResultEngine<Option<Document>> {
        let inner = self.lock()?;
        Ok(inner
            .docs
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(_, fields)| Document::new(id, fields.clone())))
    }

    async fn query(&self, collection: &str, query: &Query) -> ResultEngine<Vec<Document>> {
        let inner = self.lock()?;
        let Some(docs) = inner.docs.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(u64, Document)> = docs
            .iter()
            .map(|(id, (seq, fields))| (*seq, Document::new(id.clone(), fields.clone())))
            .filter(|(_, doc)| query.matches(doc))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);

        let mut result: Vec<Document> = matched.into_iter().map(|(_, doc)| doc).collect();
        query.sort(&mut result);
        Ok(result)
    }

    async fn add(&self, collection: &str, fields: Fields) -> ResultEngine<String> {
        let id = new_id();
        self.lock()?.insert(collection, id.clone(), fields);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> ResultEngine<()> {
        self.lock()?.merge(collection, id, fields)
    }

    async fn delete(&self, collection: &str, id: &str) -> ResultEngine<()> {
        self.lock()?.remove(collection, id)
    }

    async fn commit(&self, batch: WriteBatch) -> ResultEngine<()> {
        if batch.len() > self.batch_limit {
            return Err(EngineError::BatchLimit(self.batch_limit));
        }

        let mut inner = self.lock()?;

        // Check every op against a scratch copy first so a failing op leaves
        // the store untouched.
        let mut staged = Collections {
            next_seq: inner.next_seq,
            docs: HashMap::new(),
        };
        for op in batch.ops() {
            let collection = match op {
                BatchOp::Add { collection, .. }
                | BatchOp::Update { collection, .. }
                | BatchOp::Delete { collection, .. } => collection,
            };
            if !staged.docs.contains_key(collection) {
                let current = inner.docs.get(collection).cloned().unwrap_or_default();
                staged.docs.insert(collection.clone(), current);
            }
        }

        for op in batch.into_ops() {
            match op {
                BatchOp::Add {
                    collection,
                    id,
                    fields,
                } => {
                    if staged.contains(&collection, &id) {
                        return Err(EngineError::Conflict(format!("{collection}/{id}")));
                    }
                    staged.insert(&collection, id, fields);
                }
                BatchOp::Update {
                    collection,
                    id,
                    fields,
                } => staged.merge(&collection, &id, fields)?,
                BatchOp::Delete { collection, id } => staged.remove(&collection, &id)?,
            }
        }

        inner.next_seq = staged.next_seq;
        for (collection, docs) in staged.docs {
            inner.docs.insert(collection, docs);
        }
        Ok(())
    }

    fn max_batch_ops(&self) -> usize {
        self.batch_limit
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::{Direction, Filter};

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn add_get_update_delete() {
        let store = MemoryStore::new();
        let id = store.add("things", fields(json!({"a": 1}))).await.unwrap();

        store
            .update("things", &id, fields(json!({"b": 2})))
            .await
            .unwrap();
        let doc = store.get("things", &id).await.unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&json!(1)));
        assert_eq!(doc.get("b"), Some(&json!(2)));

        store.delete("things", &id).await.unwrap();
        assert!(store.get("things", &id).await.unwrap().is_none());
        assert!(matches!(
            store.delete("things", &id).await,
            Err(EngineError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn query_keeps_insertion_order_unless_ordered() {
        let store = MemoryStore::new();
        for n in [3, 1, 2] {
            store
                .add("things", fields(json!({"n": n, "kind": "x"})))
                .await
                .unwrap();
        }

        let unordered = store
            .query("things", &Query::new().filter(Filter::eq("kind", "x")))
            .await
            .unwrap();
        let ns: Vec<_> = unordered.iter().map(|d| d.get("n").cloned()).collect();
        assert_eq!(ns, [Some(json!(3)), Some(json!(1)), Some(json!(2))]);

        let ordered = store
            .query("things", &Query::new().order_by("n", Direction::Desc))
            .await
            .unwrap();
        let ns: Vec<_> = ordered.iter().map(|d| d.get("n").cloned()).collect();
        assert_eq!(ns, [Some(json!(3)), Some(json!(2)), Some(json!(1))]);
    }

    #[tokio::test]
    async fn failing_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let existing = store.add("things", fields(json!({"n": 1}))).await.unwrap();

        let mut batch = store.batch();
        batch.add("things", "new", fields(json!({"n": 2}))).unwrap();
        batch.delete("things", &existing).unwrap();
        batch.delete("things", "missing").unwrap();

        assert!(store.commit(batch).await.is_err());
        assert_eq!(store.count("things"), 1);
        assert!(store.get("things", "new").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adding_an_existing_id_is_a_conflict() {
        let store = MemoryStore::new();
        let mut batch = store.batch();
        batch.add("things", "a", fields(json!({"n": 1}))).unwrap();
        store.commit(batch.clone()).await.unwrap();

        let err = store.commit(batch).await.unwrap_err();
        assert_eq!(err, EngineError::Conflict("things/a".to_string()));
        assert!(!err.is_transient());
        assert_eq!(store.count("things"), 1);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let store = MemoryStore::with_batch_limit(1);
        let mut batch = WriteBatch::new(10);
        batch.delete("things", "a").unwrap();
        batch.delete("things", "b").unwrap();
        assert_eq!(store.commit(batch).await, Err(EngineError::BatchLimit(1)));
    }
}
