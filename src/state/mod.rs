// ============================================================================
// State Module
// ============================================================================
//
// The entity life-cycle engine for one model:
// - State: cheap-to-clone handle over the shared store, bound to a model
// - Unit / Machine / Application / Relation: entity handles. A handle
//   caches the document it last read, but every mutation re-reads the
//   store and builds its ops from that fresh view.
//
// All writes go through the model-scoped runner, so ids passed around
// in this module are model-local.
//
// ============================================================================

pub mod address;
pub mod application;
pub mod charm;
pub mod config;
pub mod machine;
pub mod model;
pub mod names;
pub mod ports;
pub mod relation;
pub mod settings;
pub mod status;
pub mod subnet;
pub mod unit;

pub use address::{Address, AddressOrigin, AddressScope};
pub use application::Application;
pub use charm::{
    Charm, CharmConfig, CharmInfo, CharmMeta, CharmUrl, ConfigOption, RelationScope,
    RelationSpec, Settings,
};
pub use config::StateConfig;
pub use machine::{Machine, MachineJob};
pub use model::Model;
pub use ports::{MachinePorts, PortRange, Protocol};
pub use relation::{Endpoint, Relation, RelationRole, RelationUnit};
pub use status::{AgentStatus, StatusInfo};
pub use subnet::Subnet;
pub use unit::{ResolvedMode, Unit};

use crate::core::{DocId, Document, MODEL_UUID_FIELD, Result, from_document};
use crate::model_scope::{CollectionSchema, MultiModelRunner, all_collections, ensure_model_uuid};
use crate::storage::{DocumentStore, Filter};
use crate::transaction::{
    AttemptOutcome, HookChecker, Op, PruneStats, Runner, TestHook, TransactionRunner, TxnId,
};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

struct StateInner {
    store: Arc<DocumentStore>,
    raw: Arc<TransactionRunner>,
    runner: MultiModelRunner,
    schema: Arc<CollectionSchema>,
    config: StateConfig,
}

/// Handle on one model of a shared store.
#[derive(Clone)]
pub struct State {
    inner: Arc<StateInner>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("model_uuid", &self.inner.config.model_uuid)
            .finish()
    }
}

impl State {
    /// Opens a new in-memory store holding a single model.
    pub async fn open(config: StateConfig) -> Result<State> {
        Self::open_with_store(DocumentStore::shared(), config).await
    }

    /// Binds to `store`, creating the model document if it is missing.
    pub async fn open_with_store(store: Arc<DocumentStore>, config: StateConfig) -> Result<State> {
        config.validate()?;
        let raw = Arc::new(TransactionRunner::new(store.clone()));
        let st = Self::bind(store, raw, Arc::new(all_collections()), config);
        st.ensure_model().await?;
        info!(
            model = %st.model_uuid(),
            name = %st.inner.config.model_name,
            "opened model state"
        );
        Ok(st)
    }

    /// Reopens a store saved with [`State::save_snapshot`] and completes
    /// any transaction that was left prepared.
    pub async fn load<P: AsRef<Path>>(path: P, config: StateConfig) -> Result<State> {
        let store = Arc::new(DocumentStore::load_snapshot(path)?);
        let st = Self::open_with_store(store, config).await?;
        st.resume_transactions().await?;
        Ok(st)
    }

    fn bind(
        store: Arc<DocumentStore>,
        raw: Arc<TransactionRunner>,
        schema: Arc<CollectionSchema>,
        config: StateConfig,
    ) -> State {
        let runner = MultiModelRunner::new(
            raw.clone(),
            schema.clone(),
            config.model_uuid.clone(),
            config.max_txn_attempts,
        );
        State {
            inner: Arc::new(StateInner {
                store,
                raw,
                runner,
                schema,
                config,
            }),
        }
    }

    /// Creates a new model in the same store and returns its handle.
    pub async fn add_model(&self, name: &str) -> Result<State> {
        let config = StateConfig::new(name)
            .max_txn_attempts(self.inner.config.max_txn_attempts)
            .prune(self.inner.config.prune.clone());
        config.validate()?;
        let st = Self::bind(
            self.inner.store.clone(),
            self.inner.raw.clone(),
            self.inner.schema.clone(),
            config,
        );
        st.ensure_model().await?;
        Ok(st)
    }

    /// Handle on an existing model of the same store.
    pub async fn for_model(&self, uuid: &str) -> Result<State> {
        let model = Model::read(self, uuid).await?;
        let config = StateConfig::new(model.name())
            .model_uuid(uuid)
            .max_txn_attempts(self.inner.config.max_txn_attempts)
            .prune(self.inner.config.prune.clone());
        Ok(Self::bind(
            self.inner.store.clone(),
            self.inner.raw.clone(),
            self.inner.schema.clone(),
            config,
        ))
    }

    pub fn model_uuid(&self) -> &str {
        &self.inner.config.model_uuid
    }

    pub fn config(&self) -> &StateConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.inner.store
    }

    pub fn runner(&self) -> &MultiModelRunner {
        &self.inner.runner
    }

    pub async fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.inner.store.save_snapshot(path).await
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Runs an attempt-protocol transaction source for this model.
    pub async fn run<'a, F>(&'a self, source: F) -> Result<()>
    where
        F: FnMut(usize) -> BoxFuture<'a, Result<AttemptOutcome>> + Send + 'a,
    {
        self.inner.runner.run(source).await
    }

    pub async fn run_transaction(&self, ops: Vec<Op>) -> Result<()> {
        self.inner.runner.run_transaction(ops).await
    }

    /// Logs `ops` as prepared without applying them, as a writer that
    /// stopped half way would.
    pub async fn prepare_transaction(&self, ops: Vec<Op>) -> Result<TxnId> {
        self.inner.runner.prepare_transaction(ops).await
    }

    pub async fn resume_transactions(&self) -> Result<usize> {
        self.inner.runner.resume_transactions().await
    }

    pub async fn maybe_prune_transactions(&self) -> Result<PruneStats> {
        self.inner
            .runner
            .maybe_prune_transactions(&self.inner.config.prune)
            .await
    }

    /// Installs hooks run around the next transactions, one pair each.
    pub fn set_test_hooks(&self, hooks: Vec<TestHook>) -> HookChecker {
        self.inner.raw.set_test_hooks(hooks)
    }

    /// Runs `block` before the first transaction and `check` after the
    /// second, the usual shape for forcing one retry.
    pub fn set_retry_hooks<B, C>(&self, block: B, check: C) -> HookChecker
    where
        B: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
        C: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.set_test_hooks(vec![TestHook::before(block), TestHook::after(check)])
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub(crate) fn doc_id(&self, local_id: &str) -> DocId {
        DocId::Str(ensure_model_uuid(self.model_uuid(), local_id))
    }

    fn is_global(&self, collection: &str) -> bool {
        self.inner.schema.is_global(collection)
    }

    pub(crate) async fn get_doc(&self, collection: &str, local_id: &str) -> Option<Document> {
        let id = if self.is_global(collection) {
            DocId::from(local_id)
        } else {
            self.doc_id(local_id)
        };
        self.inner.store.get(collection, &id).await
    }

    pub(crate) async fn get_entity<T: DeserializeOwned>(
        &self,
        collection: &str,
        local_id: &str,
    ) -> Result<Option<T>> {
        match self.get_doc(collection, local_id).await {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// This model's documents in `collection` that match `filter`,
    /// ordered by id.
    pub(crate) async fn find_entities<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Vec<T>> {
        let filter = Filter::eq(MODEL_UUID_FIELD, self.model_uuid()).also(filter);
        self.inner
            .store
            .find(collection, &filter)
            .await
            .into_iter()
            .map(from_document::<T>)
            .collect()
    }

    /// Next value of a model-scoped counter, starting at zero.
    pub(crate) async fn sequence(&self, name: &str) -> Result<u64> {
        self.inner.store.next_sequence(&self.doc_id(name)).await
    }

    async fn ensure_model(&self) -> Result<()> {
        if Model::read(self, self.model_uuid()).await.is_ok() {
            return Ok(());
        }
        self.run_transaction(vec![Model::insert_op(&self.inner.config)?])
            .await
            .or_else(|err| match err {
                // Another handle created it first.
                crate::core::StateError::TxnAborted => Ok(()),
                other => Err(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_models_share_a_store() {
        let st = State::open(StateConfig::new("first")).await.unwrap();
        let other = st.add_model("second").await.unwrap();
        assert_ne!(st.model_uuid(), other.model_uuid());

        let again = st.for_model(other.model_uuid()).await.unwrap();
        assert_eq!(again.model().await.unwrap().name(), "second");
        assert!(Arc::ptr_eq(st.store(), again.store()));

        let err = st.for_model("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "model \"nope\" not found");
    }

    #[tokio::test]
    async fn test_sequences_are_per_model() {
        let st = State::open(StateConfig::default()).await.unwrap();
        let other = st.add_model("other").await.unwrap();
        assert_eq!(st.sequence("machine").await.unwrap(), 0);
        assert_eq!(st.sequence("machine").await.unwrap(), 1);
        assert_eq!(other.sequence("machine").await.unwrap(), 0);
    }
}
