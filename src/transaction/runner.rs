// ============================================================================
// Transaction Runner
// ============================================================================
//
// Applies lists of conditional document operations atomically. Commit is
// two-phase: the transaction is logged as prepared once its assertions
// hold, then applied and marked applied. Both phases normally happen under
// one store lock; `prepare_transaction` stops after the first to leave
// work for `resume_transactions`.
//
// ============================================================================

use super::hooks::{HookChecker, HookQueue, TestHook};
use super::prune::{PruneOptions, PruneStats};
use super::state::{TXNS_COLLECTION, TXNS_PRUNE_COLLECTION, TxnId, TxnRecord, TxnState};
use super::Op;
use crate::core::{DocId, Document, Result, StateError, from_document, to_document};
use crate::storage::{Collections, DocumentStore, Filter};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Attempts made by [`run_attempts`] before giving up with
/// [`StateError::ExcessiveContention`].
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

const TXN_SEQUENCE: &str = "txns";
const PRUNE_DOC: &str = "last";

/// What one attempt of a transaction source proposes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Run these ops; retry from scratch if an assertion fails.
    Ops(Vec<Op>),
    /// Nothing to do; the run succeeds.
    NoOps,
    /// The state read was inconsistent; try again.
    Transient,
}

/// Common surface of the raw and model-scoped runners.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Applies `ops` atomically, failing with [`StateError::TxnAborted`] if
    /// any assertion does not hold.
    async fn run_transaction(&self, ops: Vec<Op>) -> Result<()>;

    /// Checks assertions and logs `ops` as prepared without applying them.
    async fn prepare_transaction(&self, ops: Vec<Op>) -> Result<TxnId>;

    /// Completes every prepared transaction. Returns how many were found.
    async fn resume_transactions(&self) -> Result<usize>;

    async fn maybe_prune_transactions(&self, opts: &PruneOptions) -> Result<PruneStats>;
}

/// Drives a transaction source: each attempt rebuilds its ops from fresh
/// reads and is retried when the runner reports an aborted transaction.
pub async fn run_attempts<'a, R, F>(runner: &R, max_attempts: usize, mut source: F) -> Result<()>
where
    R: Runner + ?Sized,
    F: FnMut(usize) -> BoxFuture<'a, Result<AttemptOutcome>> + Send,
{
    for attempt in 0..max_attempts {
        let ops = match source(attempt).await? {
            AttemptOutcome::NoOps => return Ok(()),
            AttemptOutcome::Transient => {
                debug!(attempt, "transient failure, retrying");
                continue;
            }
            AttemptOutcome::Ops(ops) => ops,
        };
        match runner.run_transaction(ops).await {
            Ok(()) => return Ok(()),
            Err(StateError::TxnAborted) => {
                debug!(attempt, "transaction aborted, retrying");
            }
            Err(err) => return Err(err),
        }
    }
    Err(StateError::ExcessiveContention)
}

/// Runs transactions directly against a shared [`DocumentStore`].
pub struct TransactionRunner {
    store: Arc<DocumentStore>,
    hooks: HookQueue,
}

impl TransactionRunner {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            hooks: HookQueue::default(),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Installs hooks consumed by the following transactions, replacing
    /// any still pending.
    pub fn set_test_hooks(&self, hooks: Vec<TestHook>) -> HookChecker {
        self.hooks.set(hooks)
    }

    pub async fn run<'a, F>(&self, source: F) -> Result<()>
    where
        F: FnMut(usize) -> BoxFuture<'a, Result<AttemptOutcome>> + Send,
    {
        run_attempts(self, DEFAULT_MAX_ATTEMPTS, source).await
    }

    async fn commit(&self, ops: Vec<Op>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut collections = self.store.write().await;
        complete_pending(&mut collections, Some(&ops))?;
        let id = next_txn_id(&mut collections)?;
        check_asserts(&mut collections, id, &ops)?;
        apply_ops(&mut collections, &ops)?;
        log_record(&mut collections, &TxnRecord::new(id, TxnState::Applied, ops))?;
        trace!(txn = %id, "transaction applied");
        Ok(())
    }
}

#[async_trait]
impl Runner for TransactionRunner {
    async fn run_transaction(&self, ops: Vec<Op>) -> Result<()> {
        let mut hooks = self.hooks.take();
        if hooks.is_empty() {
            return self.commit(ops).await;
        }
        let hook = hooks.remove(0);
        if let Some(before) = hook.before {
            debug!("transaction 'before' hook start");
            before().await;
            debug!("transaction 'before' hook end");
        }
        let result = self.commit(ops).await;
        if let Some(after) = hook.after {
            debug!("transaction 'after' hook start");
            after().await;
            debug!("transaction 'after' hook end");
        }
        self.hooks.restore(hooks);
        result
    }

    async fn prepare_transaction(&self, ops: Vec<Op>) -> Result<TxnId> {
        let mut collections = self.store.write().await;
        complete_pending(&mut collections, Some(&ops))?;
        let id = next_txn_id(&mut collections)?;
        check_asserts(&mut collections, id, &ops)?;
        log_record(&mut collections, &TxnRecord::new(id, TxnState::Prepared, ops))?;
        debug!(txn = %id, "transaction prepared");
        Ok(id)
    }

    async fn resume_transactions(&self) -> Result<usize> {
        let mut collections = self.store.write().await;
        let resumed = complete_pending(&mut collections, None)?;
        if resumed > 0 {
            info!(resumed, "resumed pending transactions");
        }
        Ok(resumed)
    }

    async fn maybe_prune_transactions(&self, opts: &PruneOptions) -> Result<PruneStats> {
        let mut collections = self.store.write().await;
        let count = collections.count(TXNS_COLLECTION);
        let prune_id = DocId::from(PRUNE_DOC);
        let last = collections
            .get(TXNS_PRUNE_COLLECTION, &prune_id)
            .and_then(|doc| doc.get("txn-count"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        if !opts.should_prune(last, count) {
            debug!(count, last, "transaction pruning not required");
            return Ok(PruneStats {
                ran: false,
                pruned: 0,
                remaining: count,
            });
        }

        let completed: Vec<DocId> = collections
            .find(TXNS_COLLECTION, Some(&Filter::ne("s", TxnState::Prepared.as_str())))
            .into_iter()
            .filter_map(|doc| doc.get("_id").and_then(Value::as_i64).map(DocId::Int))
            .take(opts.max_new_transactions)
            .collect();
        for id in &completed {
            collections.remove(TXNS_COLLECTION, id);
        }
        let remaining = collections.count(TXNS_COLLECTION);

        let mut stats = Document::new();
        stats.insert("txn-count".to_string(), Value::from(remaining as u64));
        stats.insert("pruned".to_string(), Value::from(completed.len() as u64));
        stats.insert(
            "completed".to_string(),
            Value::from(chrono::Utc::now().to_rfc3339()),
        );
        collections.upsert(TXNS_PRUNE_COLLECTION, &prune_id, stats);
        debug!(pruned = completed.len(), remaining, "pruned transactions");
        Ok(PruneStats {
            ran: true,
            pruned: completed.len(),
            remaining,
        })
    }
}

fn next_txn_id(collections: &mut Collections) -> Result<TxnId> {
    Ok(TxnId(collections.next_counter(&DocId::from(TXN_SEQUENCE))? + 1))
}

/// Logs an aborted record and fails if any assertion does not hold.
/// Assertions see the state before any op of the transaction is applied.
fn check_asserts(collections: &mut Collections, id: TxnId, ops: &[Op]) -> Result<()> {
    let failed = ops
        .iter()
        .find(|op| !op.assert.holds(collections.get(&op.collection, &op.id)));
    if let Some(op) = failed {
        debug!(
            txn = %id,
            collection = %op.collection,
            id = %op.id,
            "transaction aborted: assertion failed"
        );
        let record = TxnRecord::new(id, TxnState::Aborted, ops.to_vec());
        log_record(collections, &record)?;
        return Err(StateError::TxnAborted);
    }
    Ok(())
}

/// Stages every change before writing any of them back, so an op that
/// fails to apply leaves the store untouched.
fn apply_ops(collections: &mut Collections, ops: &[Op]) -> Result<()> {
    let mut staged: BTreeMap<(String, DocId), Option<Document>> = BTreeMap::new();
    for op in ops {
        let key = (op.collection.clone(), op.id.clone());
        let slot = staged
            .entry(key)
            .or_insert_with(|| collections.get(&op.collection, &op.id).cloned());
        op.apply_to(slot)?;
    }
    for ((collection, id), doc) in staged {
        collections.replace(&collection, &id, doc);
    }
    Ok(())
}

fn log_record(collections: &mut Collections, record: &TxnRecord) -> Result<()> {
    let id = DocId::Int(record.id.as_u64() as i64);
    collections.upsert(TXNS_COLLECTION, &id, to_document(record)?);
    Ok(())
}

/// Applies prepared transactions, oldest first. With `touching`, only
/// those sharing a document with the given ops are completed.
fn complete_pending(collections: &mut Collections, touching: Option<&[Op]>) -> Result<usize> {
    let pending = collections.find(
        TXNS_COLLECTION,
        Some(&Filter::eq("s", TxnState::Prepared.as_str())),
    );
    let mut completed = 0;
    for doc in pending {
        let mut record: TxnRecord = from_document(doc)?;
        if touching.is_some_and(|ops| !record.touches_any(ops)) {
            continue;
        }
        apply_ops(collections, &record.ops)?;
        record.state = TxnState::Applied;
        log_record(collections, &record)?;
        debug!(txn = %record.id, "completed pending transaction");
        completed += 1;
    }
    Ok(completed)
}
