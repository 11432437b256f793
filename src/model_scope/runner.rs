// ============================================================================
// Model-scoped transaction runner
// ============================================================================
//
// Several models share one set of physical collections. Before ops reach
// the raw runner their ids are namespaced with the model uuid and their
// documents are stamped with it. A batch naming an unknown or raw-access
// collection is rejected whole.
//
// ============================================================================

use super::schema::CollectionSchema;
use crate::core::{DocId, Document, ID_FIELD, MODEL_UUID_FIELD, Result, ResultExt, StateError};
use crate::storage::{Update, UpdateOperator};
use crate::transaction::{
    AttemptOutcome, Op, OpKind, PruneOptions, PruneStats, Runner, TransactionRunner, TxnId,
    run_attempts,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Prefixes `id` with the model uuid unless it already carries it.
pub fn ensure_model_uuid(model_uuid: &str, id: &str) -> String {
    let prefix = format!("{model_uuid}:");
    if id.starts_with(&prefix) {
        id.to_string()
    } else {
        format!("{prefix}{id}")
    }
}

/// The model-local part of a namespaced id.
pub fn local_id<'a>(model_uuid: &str, id: &'a str) -> &'a str {
    id.strip_prefix(model_uuid)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(id)
}

fn ensure_model_uuid_if_string(model_uuid: &str, id: &DocId) -> DocId {
    match id {
        DocId::Str(s) => DocId::Str(ensure_model_uuid(model_uuid, s)),
        other => other.clone(),
    }
}

/// Rewrites `_id` and checks `model-uuid` in a document. An empty
/// `model-uuid` is filled in; with `require_uuid` a missing one is added.
fn munge_doc(doc: &Document, model_uuid: &str, require_uuid: bool) -> Result<Document> {
    let mut out = doc.clone();
    if let Some(Value::String(id)) = doc.get(ID_FIELD) {
        out.insert(
            ID_FIELD.to_string(),
            Value::String(ensure_model_uuid(model_uuid, id)),
        );
    }
    match doc.get(MODEL_UUID_FIELD) {
        Some(Value::String(uuid)) if uuid.is_empty() => {
            out.insert(MODEL_UUID_FIELD.to_string(), Value::from(model_uuid));
        }
        Some(Value::String(uuid)) if uuid == model_uuid => {}
        Some(other) => {
            let got = other.as_str().map_or_else(|| other.to_string(), str::to_string);
            return Err(StateError::InvalidArgument(format!(
                "bad \"model-uuid\" value: expected {model_uuid}, got {got}"
            )));
        }
        None if require_uuid => {
            out.insert(MODEL_UUID_FIELD.to_string(), Value::from(model_uuid));
        }
        None => {}
    }
    Ok(out)
}

fn munge_update(update: &Update, model_uuid: &str) -> Result<Update> {
    let munge = |op: UpdateOperator, fields: &Document| -> Result<Document> {
        if op == UpdateOperator::Set {
            munge_doc(fields, model_uuid, false)
        } else {
            Ok(fields.clone())
        }
    };
    match update {
        Update::Ordered(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (op, fields) in entries {
                out.push((*op, munge(*op, fields)?));
            }
            Ok(Update::Ordered(out))
        }
        Update::Keyed(entries) => {
            let mut out = BTreeMap::new();
            for (op, fields) in entries {
                out.insert(*op, munge(*op, fields)?);
            }
            Ok(Update::Keyed(out))
        }
    }
}

/// Runner bound to one model over the shared raw runner.
#[derive(Clone)]
pub struct MultiModelRunner {
    raw: Arc<TransactionRunner>,
    schema: Arc<CollectionSchema>,
    model_uuid: String,
    max_attempts: usize,
}

impl MultiModelRunner {
    pub fn new(
        raw: Arc<TransactionRunner>,
        schema: Arc<CollectionSchema>,
        model_uuid: impl Into<String>,
        max_attempts: usize,
    ) -> Self {
        Self {
            raw,
            schema,
            model_uuid: model_uuid.into(),
            max_attempts,
        }
    }

    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    pub fn raw(&self) -> &Arc<TransactionRunner> {
        &self.raw
    }

    /// Rewrites a whole batch, or fails without producing any op.
    pub fn update_ops(&self, ops: Vec<Op>) -> Result<Vec<Op>> {
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let info = self
                .schema
                .get(&op.collection)
                .ok_or_else(|| StateError::UnknownCollection(op.collection.clone()))?;
            if info.raw_access {
                return Err(StateError::RawAccessCollection(op.collection));
            }
            if info.global {
                out.push(op);
                continue;
            }
            let kind = match &op.kind {
                OpKind::Insert(doc) => OpKind::Insert(
                    munge_doc(doc, &self.model_uuid, true)
                        .annotate_with(|| format!("cannot insert into {:?}", op.collection))?,
                ),
                OpKind::Update(update) => OpKind::Update(
                    munge_update(update, &self.model_uuid)
                        .annotate_with(|| format!("cannot update {:?}", op.collection))?,
                ),
                other => other.clone(),
            };
            out.push(Op {
                id: ensure_model_uuid_if_string(&self.model_uuid, &op.id),
                collection: op.collection,
                assert: op.assert,
                kind,
            });
        }
        trace!(model = %self.model_uuid, ops = ?out, "rewrote transaction");
        Ok(out)
    }

    /// Like [`TransactionRunner::run`], rewriting each attempt's ops.
    pub async fn run<'a, F>(&'a self, mut source: F) -> Result<()>
    where
        F: FnMut(usize) -> BoxFuture<'a, Result<AttemptOutcome>> + Send + 'a,
    {
        run_attempts(self.raw.as_ref(), self.max_attempts, move |attempt| {
            let next = source(attempt);
            Box::pin(async move {
                match next.await? {
                    AttemptOutcome::Ops(ops) => Ok(AttemptOutcome::Ops(self.update_ops(ops)?)),
                    other => Ok(other),
                }
            })
        })
        .await
    }
}

#[async_trait]
impl Runner for MultiModelRunner {
    async fn run_transaction(&self, ops: Vec<Op>) -> Result<()> {
        let ops = self.update_ops(ops)?;
        self.raw.run_transaction(ops).await
    }

    async fn prepare_transaction(&self, ops: Vec<Op>) -> Result<TxnId> {
        let ops = self.update_ops(ops)?;
        self.raw.prepare_transaction(ops).await
    }

    async fn resume_transactions(&self) -> Result<usize> {
        self.raw.resume_transactions().await
    }

    async fn maybe_prune_transactions(&self, opts: &PruneOptions) -> Result<PruneStats> {
        self.raw.maybe_prune_transactions(opts).await
    }
}
