pub mod filter;
pub mod memory;
pub mod snapshot;
pub mod update;

pub use filter::Filter;
pub use memory::{Collections, DocumentStore, SEQUENCE_COLLECTION};
pub use snapshot::{SnapshotManager, StoreSnapshot};
pub use update::{Update, UpdateOperator};
