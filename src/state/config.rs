use crate::core::{Result, StateError};
use crate::transaction::{DEFAULT_MAX_ATTEMPTS, PruneOptions};

const URL_SCHEME: &str = "modelstate://";

/// Settings a [`State`](super::State) is opened with.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Model the handle is bound to
    pub model_uuid: String,

    /// Human readable model name
    pub model_name: String,

    /// Attempts made by the retry driver before reporting contention
    pub max_txn_attempts: usize,

    /// Thresholds for transaction log pruning
    pub prune: PruneOptions,
}

impl StateConfig {
    /// Configuration for a new model with a fresh uuid
    pub fn new(model_name: &str) -> Self {
        Self {
            model_uuid: uuid::Uuid::new_v4().to_string(),
            model_name: model_name.to_string(),
            max_txn_attempts: DEFAULT_MAX_ATTEMPTS,
            prune: PruneOptions::default(),
        }
    }

    /// Set the model uuid
    pub fn model_uuid(mut self, uuid: &str) -> Self {
        self.model_uuid = uuid.to_string();
        self
    }

    /// Set the retry bound
    pub fn max_txn_attempts(mut self, attempts: usize) -> Self {
        self.max_txn_attempts = attempts;
        self
    }

    /// Set prune thresholds
    pub fn prune(mut self, prune: PruneOptions) -> Self {
        self.prune = prune;
        self
    }

    /// Parse from a model url
    ///
    /// Format: "modelstate://name@uuid"
    ///
    /// # Examples
    ///
    /// ```
    /// use modelstate::state::StateConfig;
    /// let config = StateConfig::from_url(
    ///     "modelstate://testing@deadbeef-0bad-400d-8000-4b1d0d06f00d"
    /// ).unwrap();
    /// assert_eq!(config.model_name, "testing");
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix(URL_SCHEME).ok_or_else(|| {
            StateError::InvalidArgument(format!("URL must start with {URL_SCHEME:?}"))
        })?;
        let (name, uuid) = rest
            .split_once('@')
            .ok_or_else(|| StateError::InvalidArgument("invalid model URL format".to_string()))?;
        uuid::Uuid::parse_str(uuid)
            .map_err(|_| StateError::InvalidArgument(format!("invalid model uuid {uuid:?}")))?;
        let config = Self::new(name).model_uuid(uuid);
        config.validate()?;
        Ok(config)
    }

    pub fn to_url(&self) -> String {
        format!("{URL_SCHEME}{}@{}", self.model_name, self.model_uuid)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.model_name.is_empty() {
            return Err(StateError::InvalidArgument(
                "model name cannot be empty".to_string(),
            ));
        }
        if self.model_uuid.is_empty() || self.model_uuid.contains(':') {
            return Err(StateError::InvalidArgument(format!(
                "invalid model uuid {:?}",
                self.model_uuid
            )));
        }
        if self.max_txn_attempts == 0 {
            return Err(StateError::InvalidArgument(
                "max_txn_attempts must be > 0".to_string(),
            ));
        }
        if self.prune.prune_factor < 1.0 {
            return Err(StateError::InvalidArgument(
                "prune factor must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self::new("testing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_round_trip() {
        let config = StateConfig::from_url(
            "modelstate://prod@deadbeef-0bad-400d-8000-4b1d0d06f00d",
        )
        .unwrap();
        assert_eq!(config.model_uuid, "deadbeef-0bad-400d-8000-4b1d0d06f00d");
        assert_eq!(config.max_txn_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(
            config.to_url(),
            "modelstate://prod@deadbeef-0bad-400d-8000-4b1d0d06f00d"
        );
    }

    #[test]
    fn test_from_url_rejects_garbage() {
        assert!(StateConfig::from_url("postgres://a@b").is_err());
        assert!(StateConfig::from_url("modelstate://nouuid").is_err());
        assert!(StateConfig::from_url("modelstate://x@not-a-uuid").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(StateConfig::new("m").validate().is_ok());
        assert!(StateConfig::new("").validate().is_err());
        assert!(StateConfig::new("m").max_txn_attempts(0).validate().is_err());
        let low = PruneOptions::new().prune_factor(0.5);
        assert!(StateConfig::new("m").prune(low).validate().is_err());
    }
}
