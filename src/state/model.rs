use super::{State, StateConfig};
use crate::core::{Life, Result, StateError, from_document, to_document};
use crate::model_scope::names::MODELS;
use crate::transaction::Op;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelDoc {
    #[serde(rename = "_id")]
    uuid: String,
    name: String,
    life: Life,
}

/// A model: the namespace every other entity lives in.
#[derive(Debug, Clone)]
pub struct Model {
    doc: ModelDoc,
}

impl Model {
    pub fn uuid(&self) -> &str {
        &self.doc.uuid
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub(crate) async fn read(st: &State, uuid: &str) -> Result<Model> {
        match st.get_doc(MODELS, uuid).await {
            Some(doc) => Ok(Model {
                doc: from_document(doc)?,
            }),
            None => Err(StateError::not_found(format!("model {uuid:?}"))),
        }
    }

    pub(crate) fn insert_op(config: &StateConfig) -> Result<Op> {
        let doc = ModelDoc {
            uuid: config.model_uuid.clone(),
            name: config.model_name.clone(),
            life: Life::Alive,
        };
        Ok(Op::insert(MODELS, config.model_uuid.as_str(), to_document(&doc)?))
    }
}

impl State {
    pub async fn model(&self) -> Result<Model> {
        Model::read(self, self.model_uuid()).await
    }
}
