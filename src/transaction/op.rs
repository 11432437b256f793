// ============================================================================
// Transaction Operations
// ============================================================================
//
// An operation names one document, an assertion that must hold against the
// document when the transaction commits, and the change to make. A
// transaction is a list of operations applied all-or-nothing.
//
// ============================================================================

use crate::core::{DocId, Document, ID_FIELD, Result, TXN_REVNO_FIELD};
use crate::storage::memory::bump_revno;
use crate::storage::{Filter, Update};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Precondition checked against a document at commit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Assert {
    #[default]
    Always,
    DocExists,
    DocMissing,
    /// The document exists and matches the filter.
    Matches(Filter),
}

impl Assert {
    pub fn holds(&self, doc: Option<&Document>) -> bool {
        match self {
            Assert::Always => true,
            Assert::DocExists => doc.is_some(),
            Assert::DocMissing => doc.is_none(),
            Assert::Matches(filter) => doc.is_some_and(|d| filter.matches(d)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Assertion only; the document is not changed.
    Assert,
    Insert(Document),
    Update(Update),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub collection: String,
    pub id: DocId,
    pub assert: Assert,
    pub kind: OpKind,
}

impl Op {
    fn new(collection: &str, id: impl Into<DocId>, kind: OpKind) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.into(),
            assert: Assert::Always,
            kind,
        }
    }

    pub fn assert(collection: &str, id: impl Into<DocId>, assert: Assert) -> Self {
        Self::new(collection, id, OpKind::Assert).with_assert(assert)
    }

    /// Inserts a new document, asserting that none exists yet.
    pub fn insert(collection: &str, id: impl Into<DocId>, doc: Document) -> Self {
        Self::new(collection, id, OpKind::Insert(doc)).with_assert(Assert::DocMissing)
    }

    pub fn update(collection: &str, id: impl Into<DocId>, update: Update) -> Self {
        Self::new(collection, id, OpKind::Update(update))
    }

    pub fn remove(collection: &str, id: impl Into<DocId>) -> Self {
        Self::new(collection, id, OpKind::Remove)
    }

    pub fn with_assert(mut self, assert: Assert) -> Self {
        self.assert = assert;
        self
    }

    pub fn matching(self, filter: Filter) -> Self {
        self.with_assert(Assert::Matches(filter))
    }

    pub fn touches(&self, collection: &str, id: &DocId) -> bool {
        self.collection == collection && &self.id == id
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            OpKind::Assert => "assert",
            OpKind::Insert(_) => "insert",
            OpKind::Update(_) => "update",
            OpKind::Remove => "remove",
        }
    }

    /// Applies the change part of the op to a staged copy of its
    /// document. Assertions must already have been checked.
    pub(crate) fn apply_to(&self, slot: &mut Option<Document>) -> Result<()> {
        match &self.kind {
            OpKind::Assert => {}
            OpKind::Insert(doc) => {
                if slot.is_none() {
                    let mut doc = doc.clone();
                    doc.insert(ID_FIELD.to_string(), self.id.to_value());
                    doc.insert(TXN_REVNO_FIELD.to_string(), Value::from(1));
                    *slot = Some(doc);
                }
            }
            OpKind::Update(update) => {
                if let Some(doc) = slot {
                    update.apply_to(doc)?;
                    bump_revno(doc);
                }
            }
            OpKind::Remove => *slot = None,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_insert_asserts_missing() {
        let op = Op::insert("units", "a/0", doc! { "life": "alive" });
        assert_eq!(op.assert, Assert::DocMissing);
        assert_eq!(op.kind_name(), "insert");
    }

    #[test]
    fn test_matches_requires_document() {
        let assert = Assert::Matches(Filter::eq("life", "alive"));
        assert!(!assert.holds(None));
        assert!(assert.holds(Some(&doc! { "life": "alive" })));
        assert!(Assert::Always.holds(None));
    }
}
