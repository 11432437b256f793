use super::Filter;
use super::update::Update;
use crate::core::{DocId, Document, ID_FIELD, Result, StateError, TXN_REVNO_FIELD};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Collection holding atomic counters (machine ids, unit numbers, ...).
pub const SEQUENCE_COLLECTION: &str = "sequence";

/// All collections of the store. Every document carries a `txn-revno`
/// which is bumped on each change.
#[derive(Debug, Default, Clone)]
pub struct Collections {
    collections: HashMap<String, BTreeMap<DocId, Document>>,
}

impl Collections {
    pub fn get(&self, collection: &str, id: &DocId) -> Option<&Document> {
        self.collections.get(collection).and_then(|docs| docs.get(id))
    }

    pub fn contains(&self, collection: &str, id: &DocId) -> bool {
        self.get(collection, id).is_some()
    }

    /// Documents matching `filter`, ordered by id.
    pub fn find(&self, collection: &str, filter: Option<&Filter>) -> Vec<Document> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };
        docs.values()
            .filter(|doc| filter.is_none_or(|f| f.matches(doc)))
            .cloned()
            .collect()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    pub fn revno(&self, collection: &str, id: &DocId) -> Option<i64> {
        self.get(collection, id)
            .and_then(|doc| doc.get(TXN_REVNO_FIELD))
            .and_then(Value::as_i64)
    }

    /// Inserts a new document. Inserting over an existing document is a
    /// no-op; callers that care assert `DocMissing`.
    pub fn insert(&mut self, collection: &str, id: &DocId, mut doc: Document) -> bool {
        let docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return false;
        }
        doc.insert(ID_FIELD.to_string(), id.to_value());
        doc.insert(TXN_REVNO_FIELD.to_string(), Value::from(1));
        docs.insert(id.clone(), doc);
        true
    }

    /// Applies `update` to an existing document. Missing documents are
    /// left untouched.
    pub fn update(&mut self, collection: &str, id: &DocId, update: &Update) -> Result<bool> {
        let Some(doc) = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        else {
            return Ok(false);
        };
        let mut changed = doc.clone();
        update.apply_to(&mut changed)?;
        bump_revno(&mut changed);
        *doc = changed;
        Ok(true)
    }

    /// Stores `doc` as is. Used to commit staged transaction changes whose
    /// revnos are already set.
    pub(crate) fn replace(&mut self, collection: &str, id: &DocId, doc: Option<Document>) {
        match doc {
            Some(doc) => {
                self.collections
                    .entry(collection.to_string())
                    .or_default()
                    .insert(id.clone(), doc);
            }
            None => {
                self.remove(collection, id);
            }
        }
    }

    pub fn remove(&mut self, collection: &str, id: &DocId) -> bool {
        self.collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some())
    }

    /// Replaces (or creates) a whole document, bumping its revno.
    pub fn upsert(&mut self, collection: &str, id: &DocId, mut doc: Document) {
        let docs = self.collections.entry(collection.to_string()).or_default();
        let revno = docs
            .get(id)
            .and_then(|d| d.get(TXN_REVNO_FIELD))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        doc.insert(ID_FIELD.to_string(), id.to_value());
        doc.insert(TXN_REVNO_FIELD.to_string(), Value::from(revno + 1));
        docs.insert(id.clone(), doc);
    }

    /// Increments the named counter in the sequence collection and returns
    /// its previous value, starting from zero.
    pub(crate) fn next_counter(&mut self, id: &DocId) -> Result<u64> {
        let current = match self.get(SEQUENCE_COLLECTION, id) {
            Some(doc) => doc
                .get("counter")
                .and_then(Value::as_u64)
                .ok_or_else(|| StateError::Serialization(format!("corrupt sequence {id}")))?,
            None => 0,
        };
        let mut doc = Document::new();
        doc.insert("counter".to_string(), Value::from(current + 1));
        self.upsert(SEQUENCE_COLLECTION, id, doc);
        Ok(current)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&String, &BTreeMap<DocId, Document>)> {
        self.collections.iter()
    }

    pub(crate) fn restore(entries: Vec<(String, Vec<(DocId, Document)>)>) -> Self {
        let collections = entries
            .into_iter()
            .map(|(name, docs)| (name, docs.into_iter().collect()))
            .collect();
        Self { collections }
    }
}

pub(crate) fn bump_revno(doc: &mut Document) {
    let revno = doc.get(TXN_REVNO_FIELD).and_then(Value::as_i64).unwrap_or(0);
    doc.insert(TXN_REVNO_FIELD.to_string(), Value::from(revno + 1));
}

/// Shared in-memory document store.
///
/// The store is the sole serialization point between writers: the
/// transaction runner takes the write lock for the duration of one
/// assert-and-apply step, readers take the read lock.
pub struct DocumentStore {
    collections: RwLock<Collections>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub(crate) fn from_collections(collections: Collections) -> Self {
        Self {
            collections: RwLock::new(collections),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.collections.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.collections.write().await
    }

    pub async fn get(&self, collection: &str, id: &DocId) -> Option<Document> {
        self.collections.read().await.get(collection, id).cloned()
    }

    pub async fn find(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        self.collections.read().await.find(collection, Some(filter))
    }

    pub async fn find_all(&self, collection: &str) -> Vec<Document> {
        self.collections.read().await.find(collection, None)
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections.read().await.count(collection)
    }

    /// Atomically increments the named counter and returns its previous
    /// value. Counters are not part of any transaction and never go
    /// backwards.
    pub async fn next_sequence(&self, id: &DocId) -> Result<u64> {
        self.collections.write().await.next_counter(id)
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}
