// ============================================================================
// Update payloads
// ============================================================================
//
// An update is a list of operator sub-documents. Callers may express it
// either as an ordered list of (operator, fields) pairs or as a keyed map
// from operator to fields; both shapes are applied identically.
//
// ============================================================================

use crate::core::{Document, ID_FIELD, Result, StateError, TXN_REVNO_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UpdateOperator {
    Set,
    Unset,
    Inc,
    AddToSet,
    Pull,
}

impl UpdateOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Unset => "$unset",
            UpdateOperator::Inc => "$inc",
            UpdateOperator::AddToSet => "$addToSet",
            UpdateOperator::Pull => "$pull",
        }
    }
}

impl fmt::Display for UpdateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<UpdateOperator> for String {
    fn from(op: UpdateOperator) -> Self {
        op.as_str().to_string()
    }
}

impl TryFrom<String> for UpdateOperator {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "$set" => Ok(UpdateOperator::Set),
            "$unset" => Ok(UpdateOperator::Unset),
            "$inc" => Ok(UpdateOperator::Inc),
            "$addToSet" => Ok(UpdateOperator::AddToSet),
            "$pull" => Ok(UpdateOperator::Pull),
            other => Err(format!("unknown update operator {other:?}")),
        }
    }
}

/// Update payload of a transaction operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Update {
    /// Operators applied in the listed order.
    Ordered(Vec<(UpdateOperator, Document)>),
    /// Operators keyed by name, applied in operator order.
    Keyed(BTreeMap<UpdateOperator, Document>),
}

impl Update {
    pub fn set(fields: Document) -> Self {
        Update::Ordered(vec![(UpdateOperator::Set, fields)])
    }

    pub fn inc(fields: Document) -> Self {
        Update::Ordered(vec![(UpdateOperator::Inc, fields)])
    }

    pub fn add_to_set(fields: Document) -> Self {
        Update::Ordered(vec![(UpdateOperator::AddToSet, fields)])
    }

    pub fn pull(fields: Document) -> Self {
        Update::Ordered(vec![(UpdateOperator::Pull, fields)])
    }

    pub fn unset(fields: Document) -> Self {
        Update::Ordered(vec![(UpdateOperator::Unset, fields)])
    }

    /// Appends another operator to the update, preserving its shape.
    pub fn and(mut self, op: UpdateOperator, fields: Document) -> Self {
        match &mut self {
            Update::Ordered(entries) => entries.push((op, fields)),
            Update::Keyed(entries) => {
                entries.entry(op).or_default().extend(fields);
            }
        }
        self
    }

    pub fn entries(&self) -> Vec<(UpdateOperator, &Document)> {
        match self {
            Update::Ordered(entries) => entries.iter().map(|(op, d)| (*op, d)).collect(),
            Update::Keyed(entries) => entries.iter().map(|(op, d)| (*op, d)).collect(),
        }
    }

    /// Applies every operator to `doc` in place. The `_id` and revno fields
    /// are never changed by an update.
    pub fn apply_to(&self, doc: &mut Document) -> Result<()> {
        let id = doc.get(ID_FIELD).cloned();
        let revno = doc.get(TXN_REVNO_FIELD).cloned();
        for (op, fields) in self.entries() {
            for (name, value) in fields {
                apply_field(doc, op, name, value)?;
            }
        }
        if let Some(id) = id {
            doc.insert(ID_FIELD.to_string(), id);
        }
        if let Some(revno) = revno {
            doc.insert(TXN_REVNO_FIELD.to_string(), revno);
        }
        Ok(())
    }
}

fn apply_field(doc: &mut Document, op: UpdateOperator, name: &str, value: &Value) -> Result<()> {
    match op {
        UpdateOperator::Set => {
            doc.insert(name.to_string(), value.clone());
        }
        UpdateOperator::Unset => {
            doc.remove(name);
        }
        UpdateOperator::Inc => {
            let delta = value.as_i64().ok_or_else(|| {
                StateError::InvalidArgument(format!("cannot $inc {name:?} by non-integer {value}"))
            })?;
            let current = match doc.get(name) {
                None | Some(Value::Null) => 0,
                Some(v) => v.as_i64().ok_or_else(|| {
                    StateError::InvalidArgument(format!("cannot $inc non-integer field {name:?}"))
                })?,
            };
            doc.insert(name.to_string(), Value::from(current + delta));
        }
        UpdateOperator::AddToSet => {
            let items = array_field(doc, name)?;
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
        UpdateOperator::Pull => {
            let items = array_field(doc, name)?;
            items.retain(|item| item != value);
        }
    }
    Ok(())
}

fn array_field<'a>(doc: &'a mut Document, name: &str) -> Result<&'a mut Vec<Value>> {
    let slot = doc
        .entry(name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| StateError::InvalidArgument(format!("field {name:?} is not an array")))
}
