// ============================================================================
// Assertion filters
// ============================================================================
//
// The small query language used by transaction assertions and collection
// scans. Fields are top-level only; array fields are matched element-wise
// by `In`/`Nin`, and a missing array field counts as empty for `Size`.
//
// ============================================================================

use crate::core::{Document, Result, to_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Nin(String, Vec<Value>),
    Size(String, usize),
    /// Numeric field strictly greater than the value.
    Gt(String, i64),
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(field.to_string(), value.into())
    }

    /// `Eq` against any serializable value (enums, structs, vectors).
    pub fn eq_ser<T: Serialize>(field: &str, value: &T) -> Result<Self> {
        Ok(Filter::Eq(field.to_string(), to_value(value)?))
    }

    pub fn in_values(field: &str, values: Vec<Value>) -> Self {
        Filter::In(field.to_string(), values)
    }

    pub fn nin_values(field: &str, values: Vec<Value>) -> Self {
        Filter::Nin(field.to_string(), values)
    }

    pub fn size(field: &str, len: usize) -> Self {
        Filter::Size(field.to_string(), len)
    }

    pub fn gt(field: &str, value: i64) -> Self {
        Filter::Gt(field.to_string(), value)
    }

    pub fn exists(field: &str, present: bool) -> Self {
        Filter::Exists(field.to_string(), present)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Combines two filters, flattening nested `And`s.
    pub fn also(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), other) => {
                left.push(other);
                Filter::And(left)
            }
            (this, Filter::And(mut right)) => {
                right.insert(0, this);
                Filter::And(right)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq(field, expected) => field_equals(doc, field, expected),
            Filter::Ne(field, expected) => !field_equals(doc, field, expected),
            Filter::In(field, candidates) => any_element_in(doc, field, candidates),
            Filter::Nin(field, candidates) => !any_element_in(doc, field, candidates),
            Filter::Size(field, len) => match doc.get(field) {
                None | Some(Value::Null) => *len == 0,
                Some(Value::Array(items)) => items.len() == *len,
                Some(_) => false,
            },
            Filter::Gt(field, bound) => doc
                .get(field)
                .and_then(Value::as_i64)
                .is_some_and(|v| v > *bound),
            Filter::Exists(field, present) => doc.contains_key(field) == *present,
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
        }
    }
}

fn field_equals(doc: &Document, field: &str, expected: &Value) -> bool {
    match doc.get(field) {
        Some(actual) => values_equal(actual, expected),
        None => expected.is_null(),
    }
}

fn any_element_in(doc: &Document, field: &str, candidates: &[Value]) -> bool {
    match doc.get(field) {
        None => false,
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| candidates.iter().any(|c| values_equal(item, c))),
        Some(value) => candidates.iter().any(|c| values_equal(value, c)),
    }
}

/// Numeric values compare by magnitude so `1` and `1.0` are equal.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => l.as_f64() == r.as_f64(),
        },
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| values_equal(a, b))
        }
        _ => left == right,
    }
}
