pub mod document;
pub mod error;
pub mod types;

pub use document::{
    DocId, Document, ID_FIELD, MODEL_UUID_FIELD, TXN_REVNO_FIELD, from_document, to_document,
    to_value,
};
pub use error::{Result, ResultExt, StateError};
pub use types::Life;
