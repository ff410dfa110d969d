//! Outcome of a converge run.

use crate::unit::Unit;
use serde::{Deserialize, Serialize};

/// A unit that modified the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub config: String,
    pub unit: Unit,
}

/// A recorded failure that did not stop the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub config: String,
    pub unit: Unit,
    pub error: String,
}

/// Everything a run did, in apply order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub changes: Vec<Change>,
    /// Non-fatal failures, such as relative file paths
    pub failures: Vec<Failure>,
    /// Command failures swallowed by `ignoreErrors`
    pub ignored: Vec<Failure>,
    /// Commands skipped because their `test` exited nonzero
    pub skipped: Vec<Change>,
    pub steps_applied: usize,
    /// Steps skipped because a resumed run had already completed them
    pub steps_skipped: usize,
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn total_changes(&self) -> usize {
        self.changes.len()
    }

    /// No recorded failures; ignored command errors do not count
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Whether `unit` changed while applying `config`
    pub fn changed(&self, config: &str, unit: &Unit) -> bool {
        self.changes
            .iter()
            .any(|change| change.config == config && &change.unit == unit)
    }

    pub(crate) fn record_change(&mut self, config: &str, unit: Unit) {
        self.changes.push(Change {
            config: config.to_string(),
            unit,
        });
    }

    pub(crate) fn record_skip(&mut self, config: &str, unit: Unit) {
        self.skipped.push(Change {
            config: config.to_string(),
            unit,
        });
    }

    pub(crate) fn record_failure(&mut self, config: &str, unit: Unit, error: impl ToString) {
        self.failures.push(Failure {
            config: config.to_string(),
            unit,
            error: error.to_string(),
        });
    }

    pub(crate) fn record_ignored(&mut self, config: &str, unit: Unit, error: impl ToString) {
        self.ignored.push(Failure {
            config: config.to_string(),
            unit,
            error: error.to_string(),
        });
    }
}
