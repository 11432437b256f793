// ============================================================================
// Transaction Log Records
// ============================================================================
//
// Every transaction leaves a record in the raw-access `txns` collection:
//
// ```text
// Prepared ──complete──> Applied
//    │
//    └──assertion failed──> Aborted
// ```
//
// A record stuck in `Prepared` belongs to a writer that stopped between
// the two phases; any later transaction touching the same documents, or
// an explicit resume, finishes it.
//
// ============================================================================

use super::Op;
use serde::{Deserialize, Serialize};

pub const TXNS_COLLECTION: &str = "txns";
pub const TXNS_PRUNE_COLLECTION: &str = "txns.prune";

/// Unique identifier for a transaction. Ids increase monotonically per
/// store, so they order records by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnState {
    Prepared,
    Applied,
    Aborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Applied | TxnState::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnState::Prepared => "prepared",
            TxnState::Applied => "applied",
            TxnState::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnRecord {
    #[serde(rename = "_id")]
    pub id: TxnId,
    #[serde(rename = "s")]
    pub state: TxnState,
    #[serde(rename = "o")]
    pub ops: Vec<Op>,
    /// Milliseconds since the epoch.
    pub created: i64,
}

impl TxnRecord {
    pub fn new(id: TxnId, state: TxnState, ops: Vec<Op>) -> Self {
        Self {
            id,
            state,
            ops,
            created: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn touches_any(&self, ops: &[Op]) -> bool {
        self.ops
            .iter()
            .any(|mine| ops.iter().any(|theirs| mine.touches(&theirs.collection, &theirs.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_state_transitions() {
        assert!(!TxnState::Prepared.is_terminal());
        assert!(TxnState::Applied.is_terminal());
        assert!(TxnState::Aborted.is_terminal());
    }

    #[test]
    fn test_record_overlap() {
        let record = TxnRecord::new(
            TxnId(1),
            TxnState::Prepared,
            vec![Op::insert("units", "a/0", doc! {})],
        );
        assert!(record.touches_any(&[Op::remove("units", "a/0")]));
        assert!(!record.touches_any(&[Op::remove("machines", "a/0")]));
    }
}
