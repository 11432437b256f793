use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Life-cycle stage of an agent-bearing entity.
///
/// ```text
/// Alive ──destroy──> Dying ──ensure_dead──> Dead ──remove──> (document gone)
/// ```
///
/// Life never decreases; the derived ordering follows the progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    #[default]
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn as_str(&self) -> &'static str {
        match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        }
    }

    pub fn to_value(self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
