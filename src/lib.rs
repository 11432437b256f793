// ============================================================================
// ModelState Library
// ============================================================================
//
// Consistency core of a cluster-management control plane:
// - transaction: optimistic-concurrency runner with retry, prune and resume
// - model_scope: rewrites operations so many models share one store
// - state: life-cycle engine for units, machines, applications and relations
//
// ============================================================================

pub mod core;
pub mod model_scope;
pub mod state;
pub mod storage;
pub mod transaction;

pub use core::{DocId, Document, Life, Result, ResultExt, StateError};
pub use model_scope::{CollectionInfo, CollectionSchema, MultiModelRunner};
pub use state::{
    AgentStatus, Application, Charm, CharmInfo, CharmUrl, Endpoint, Machine, MachineJob, Model,
    Relation, RelationUnit, ResolvedMode, State, StateConfig, Unit,
};
pub use storage::{DocumentStore, Filter, Update};
pub use transaction::{
    Assert, AttemptOutcome, Op, OpKind, PruneOptions, PruneStats, Runner, TestHook,
    TransactionRunner,
};
