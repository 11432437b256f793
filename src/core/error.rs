use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// Entity absent from the store. Carries the full message,
    /// e.g. `unit "mysql/0" not found`.
    #[error("{0}")]
    NotFound(String),

    #[error("{0} is not assigned to a machine")]
    NotAssigned(String),

    /// Terminal: the entity is Dead or already removed.
    #[error("not found or dead")]
    Dead,

    #[error("{0} is not dead")]
    NotDead(String),

    #[error("{0} is not alive")]
    NotAlive(String),

    /// Subordinates, colocated units, containers or a vote block a transition.
    #[error("{0}")]
    HasDependents(String),

    #[error("state changing too quickly; try again soon")]
    ExcessiveContention,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0} is not in an error state")]
    NotInErrorState(String),

    #[error("unit charm not set")]
    CharmNotSet,

    #[error("no {0} address")]
    NoAddress(String),

    #[error("{0}")]
    PortConflict(String),

    #[error("forbidden transaction: references unknown collection {0:?}")]
    UnknownCollection(String),

    #[error("forbidden transaction: references raw-access collection {0:?}")]
    RawAccessCollection(String),

    /// An assertion did not hold at commit time.
    #[error("transaction aborted")]
    TxnAborted,

    #[error("{context}: {source}")]
    Annotated {
        context: String,
        source: Box<StateError>,
    },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(format!("{} not found", what.into()))
    }

    pub fn unit_has_subordinates() -> Self {
        Self::HasDependents("unit has subordinates".to_string())
    }

    /// Wraps `self` with a context prefix, keeping the original as the cause.
    pub fn annotate(self, context: impl Into<String>) -> Self {
        Self::Annotated {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all annotations stripped.
    pub fn cause(&self) -> &StateError {
        match self {
            Self::Annotated { source, .. } => source.cause(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.cause(), Self::NotFound(_))
    }

    pub fn is_not_assigned(&self) -> bool {
        matches!(self.cause(), Self::NotAssigned(_))
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.cause(), Self::Dead)
    }

    pub fn is_has_dependents(&self) -> bool {
        matches!(self.cause(), Self::HasDependents(_))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self.cause(), Self::ExcessiveContention)
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(
            self.cause(),
            Self::UnknownCollection(_) | Self::RawAccessCollection(_)
        )
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.cause(), Self::InvalidArgument(_))
    }
}

/// Adds context to the error side of a `Result`.
pub trait ResultExt<T> {
    fn annotate(self, context: impl Into<String>) -> Result<T>;
    fn annotate_with<F: FnOnce() -> String>(self, context: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn annotate(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| err.annotate(context))
    }

    fn annotate_with<F: FnOnce() -> String>(self, context: F) -> Result<T> {
        self.map_err(|err| err.annotate(context()))
    }
}

impl<T> From<std::sync::PoisonError<T>> for StateError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotated_message_and_cause() {
        let err = StateError::ExcessiveContention.annotate("cannot destroy unit \"a/0\"");
        assert_eq!(
            err.to_string(),
            "cannot destroy unit \"a/0\": state changing too quickly; try again soon"
        );
        assert!(err.is_contention());
        assert_eq!(err.cause(), &StateError::ExcessiveContention);
    }

    #[test]
    fn test_forbidden_messages() {
        let unknown = StateError::UnknownCollection("bar".into());
        assert_eq!(
            unknown.to_string(),
            "forbidden transaction: references unknown collection \"bar\""
        );
        let raw = StateError::RawAccessCollection("txns".into());
        assert_eq!(
            raw.to_string(),
            "forbidden transaction: references raw-access collection \"txns\""
        );
        assert!(unknown.is_forbidden() && raw.is_forbidden());
    }

    #[test]
    fn test_not_found_helper() {
        let err = StateError::not_found("unit \"subway/0\"");
        assert_eq!(err.to_string(), "unit \"subway/0\" not found");
        assert!(err.is_not_found());
    }
}
