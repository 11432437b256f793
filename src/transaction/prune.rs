use serde::{Deserialize, Serialize};

/// Controls when completed transaction records are pruned.
///
/// A pass runs only once at least `min_new_transactions` records have
/// accumulated since the previous pass and the log has grown by
/// `prune_factor` relative to its size after that pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneOptions {
    pub prune_factor: f64,
    pub min_new_transactions: usize,
    /// Upper bound on records deleted in one pass.
    pub max_new_transactions: usize,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            prune_factor: 1.1,
            min_new_transactions: 1000,
            max_new_transactions: 100_000,
        }
    }
}

impl PruneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prune_factor(mut self, factor: f64) -> Self {
        self.prune_factor = factor;
        self
    }

    pub fn min_new_transactions(mut self, min: usize) -> Self {
        self.min_new_transactions = min;
        self
    }

    pub fn max_new_transactions(mut self, max: usize) -> Self {
        self.max_new_transactions = max;
        self
    }

    /// `last` is the log size recorded after the previous pass (zero if
    /// none), `count` the current size.
    pub fn should_prune(&self, last: usize, count: usize) -> bool {
        let new = count.saturating_sub(last);
        if new < self.min_new_transactions {
            return false;
        }
        last == 0 || count as f64 >= last as f64 * self.prune_factor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruneStats {
    /// False when the growth thresholds were not met.
    pub ran: bool,
    pub pruned: usize,
    pub remaining: usize,
}
