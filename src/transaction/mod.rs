// ============================================================================
// Transaction Module
// ============================================================================
//
// Optimistic multi-document transactions over the document store:
// - Op: a document, an assertion on it, and the change to make
// - Runner: atomic apply of an op list, with a prepared/applied log
// - run_attempts: re-reads and rebuilds ops until they apply or the
//   attempt budget runs out
//
// ============================================================================

pub mod hooks;
pub mod op;
pub mod prune;
pub mod runner;
pub mod state;

pub use hooks::{HookChecker, HookFn, TestHook};
pub use op::{Assert, Op, OpKind};
pub use prune::{PruneOptions, PruneStats};
pub use runner::{
    AttemptOutcome, DEFAULT_MAX_ATTEMPTS, Runner, TransactionRunner, run_attempts,
};
pub use state::{TXNS_COLLECTION, TXNS_PRUNE_COLLECTION, TxnId, TxnRecord, TxnState};
