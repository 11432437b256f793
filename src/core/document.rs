// ============================================================================
// Documents and document identifiers
// ============================================================================

use super::{Result, StateError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored document: an ordered map of field names to JSON values.
pub type Document = serde_json::Map<String, Value>;

/// Field holding the document identifier.
pub const ID_FIELD: &str = "_id";
/// Field stamped on every model-scoped document.
pub const MODEL_UUID_FIELD: &str = "model-uuid";
/// Optimistic-concurrency fingerprint maintained by the store.
pub const TXN_REVNO_FIELD: &str = "txn-revno";

/// Identifier of a document within a collection.
///
/// Only string ids are namespaced by model; integer ids are treated as
/// opaque composite keys and left alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocId {
    Str(String),
    Int(i64),
}

impl DocId {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocId::Str(s) => Some(s),
            DocId::Int(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocId::Str(s) => Value::String(s.clone()),
            DocId::Int(i) => Value::from(*i),
        }
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocId::Str(s) => write!(f, "{s}"),
            DocId::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for DocId {
    fn from(value: &str) -> Self {
        DocId::Str(value.to_string())
    }
}

impl From<String> for DocId {
    fn from(value: String) -> Self {
        DocId::Str(value)
    }
}

impl From<i64> for DocId {
    fn from(value: i64) -> Self {
        DocId::Int(value)
    }
}

/// Builds a [`Document`] from JSON object syntax.
///
/// ```
/// use modelstate::doc;
/// let d = doc! { "life": "alive", "unitcount": 0 };
/// assert_eq!(d.len(), 2);
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::core::Document::new()
    };
    ($($tt:tt)+) => {
        match ::serde_json::json!({ $($tt)+ }) {
            ::serde_json::Value::Object(map) => map,
            _ => $crate::core::Document::new(),
        }
    };
}

/// Serializes a typed entity document, dropping the store-managed revno.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(mut map) => {
            map.remove(TXN_REVNO_FIELD);
            Ok(map)
        }
        other => Err(StateError::Serialization(format!(
            "expected an object document, got {other}"
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Converts any serializable value into a JSON value for use in filters
/// and update payloads.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
