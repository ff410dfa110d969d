//! Error types for applying configs and persisting run-state.

use crate::report::ApplyReport;
use crate::unit::Unit;
use metadata::PlanStep;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single unit
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A user names a group that neither exists nor was created earlier in the run
    #[error("user '{user}' requires group '{group}', which does not exist")]
    DependencyMissing {
        /// The user being created
        user: String,
        /// The missing supplementary group
        group: String,
    },

    /// A file target is not an absolute path; recorded without aborting the run
    #[error("file path '{path}' is not absolute")]
    InvalidPath {
        /// The rejected path
        path: String,
    },

    /// A command exited nonzero without `ignoreErrors`
    #[error("command '{name}' failed with exit code {code}")]
    CommandFailed {
        /// Name of the command entry
        name: String,
        /// Process exit code
        code: i32,
    },

    /// A resource spec holds a value the host cannot act on
    #[error("invalid spec for {unit}: {reason}")]
    InvalidSpec {
        /// Resource name
        unit: String,
        /// What is wrong with it
        reason: String,
    },

    /// The host backend failed
    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    /// Saved run-state does not describe the plan being resumed
    #[error("saved run-state does not match this run: {0}")]
    StaleState(String),

    /// A plan step names a config the document does not define
    #[error("config '{0}' is not defined")]
    MissingConfig(String),

    /// Run-state could not be read or written
    #[error(transparent)]
    State(#[from] StateError),
}

impl ApplyError {
    /// Whether the run may continue past this failure
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidPath { .. })
    }
}

/// Errors reading or writing `run-state.toml`
#[derive(Debug, Error)]
pub enum StateError {
    /// Filesystem error on the state file
    #[error("run-state I/O error at {path}: {source}")]
    Io {
        /// State file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid TOML for a run-state
    #[error("failed to parse run-state {path}: {source}")]
    Parse {
        /// State file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// The state could not be serialized
    #[error("failed to serialize run-state: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A fatal failure during [`crate::Converger::apply`]
///
/// Carries the unit that failed and the report of everything applied before
/// it, so callers can show partial progress.
#[derive(Debug)]
pub struct ConvergeError {
    /// Plan step being applied, if the failure happened inside one
    pub step: Option<PlanStep>,
    /// Unit being applied, if the failure happened inside one
    pub unit: Option<Unit>,
    pub source: ApplyError,
    /// Work completed before the failure
    pub report: ApplyReport,
}

impl fmt::Display for ConvergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.step, &self.unit) {
            (Some(step), Some(unit)) => {
                write!(f, "config '{}' failed at {unit}: {}", step.config, self.source)
            }
            (Some(step), None) => write!(f, "config '{}' failed: {}", step.config, self.source),
            _ => write!(f, "{}", self.source),
        }
    }
}

impl std::error::Error for ConvergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
