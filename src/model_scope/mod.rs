pub mod runner;
pub mod schema;

pub use runner::{MultiModelRunner, ensure_model_uuid, local_id};
pub use schema::{CollectionInfo, CollectionSchema, all_collections, names};
