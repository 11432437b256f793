use super::State;
use crate::core::{ID_FIELD, Result, StateError, from_document, to_document};
use crate::model_scope::names::STATUSES;
use crate::storage::{Filter, Update};
use crate::transaction::{Assert, Op};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported by a unit agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Recorded at creation; the agent has never reported.
    Allocating,
    Rebooting,
    Executing,
    Idle,
    Failed,
    Lost,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Allocating => "allocating",
            AgentStatus::Rebooting => "rebooting",
            AgentStatus::Executing => "executing",
            AgentStatus::Idle => "idle",
            AgentStatus::Failed => "failed",
            AgentStatus::Lost => "lost",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub status: AgentStatus,
    pub message: String,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StatusDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub statusinfo: String,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl StatusDoc {
    pub fn new(key: &str, status: AgentStatus, message: &str) -> Self {
        Self {
            doc_id: key.to_string(),
            status,
            statusinfo: message.to_string(),
            updated: Some(Utc::now()),
        }
    }

    pub fn info(&self) -> StatusInfo {
        StatusInfo {
            status: self.status,
            message: self.statusinfo.clone(),
            since: self.updated,
        }
    }
}

/// Status key of a unit agent.
pub(crate) fn unit_agent_key(unit: &str) -> String {
    format!("u#{unit}")
}

pub(crate) fn create_status_op(key: &str, status: AgentStatus) -> Result<Op> {
    let doc = to_document(&StatusDoc::new(key, status, ""))?;
    Ok(Op::insert(STATUSES, key, doc))
}

pub(crate) fn remove_status_op(key: &str) -> Op {
    Op::remove(STATUSES, key)
}

/// Asserts that the status has not changed since it was read.
pub(crate) fn status_unchanged_op(key: &str, status: AgentStatus) -> Op {
    Op::assert(STATUSES, key, Assert::DocExists).matching(Filter::eq("status", status.as_str()))
}

pub(crate) async fn read_status(st: &State, key: &str) -> Result<Option<StatusDoc>> {
    match st.get_doc(STATUSES, key).await {
        Some(doc) => Ok(Some(from_document(doc)?)),
        None => Ok(None),
    }
}

pub(crate) fn set_status_op(key: &str, status: AgentStatus, message: &str) -> Result<Op> {
    if status == AgentStatus::Error && message.is_empty() {
        return Err(StateError::InvalidArgument(format!(
            "cannot set status {:?} without info",
            status.as_str()
        )));
    }
    let mut fields = to_document(&StatusDoc::new(key, status, message))?;
    fields.remove(ID_FIELD);
    let update = Update::set(fields);
    Ok(Op::update(STATUSES, key, update).with_assert(Assert::DocExists))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_needs_message() {
        let err = set_status_op("u#a/0", AgentStatus::Error, "").unwrap_err();
        assert_eq!(err.to_string(), "cannot set status \"error\" without info");
        assert!(set_status_op("u#a/0", AgentStatus::Error, "hook failed").is_ok());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let value = serde_json::to_value(AgentStatus::Allocating).unwrap();
        assert_eq!(value, serde_json::json!("allocating"));
    }
}
