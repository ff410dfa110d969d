use crate::error::{ApplyError, StateError};
use crate::unit::{Category, Unit};
use chrono::{DateTime, Utc};
use metadata::{ExecutionPlan, PlanStep};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the state file inside the data directory
pub const STATE_FILE: &str = "run-state.toml";

// ============================================================================
// State Structures
// ============================================================================

/// Persisted progress of a converge run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Last time the state was saved
    pub updated_at: DateTime<Utc>,

    /// `set/config` label of every plan step, fingerprinting the plan
    #[serde(default)]
    pub plan: Vec<String>,

    /// Number of plan steps fully applied
    #[serde(default)]
    pub completed_steps: usize,

    /// Units of the current step that changed the host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<Unit>,

    /// Last unit completed within the current step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<UnitCursor>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            plan: Vec::new(),
            completed_steps: 0,
            changed: Vec::new(),
            cursor: None,
        }
    }
}

impl RunState {
    /// Whether nothing has been recorded yet
    pub fn is_fresh(&self) -> bool {
        self.plan.is_empty() && self.completed_steps == 0 && self.cursor.is_none()
    }
}

/// Position of the last completed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCursor {
    /// Plan position of the step the unit belongs to
    pub step: usize,
    /// Index of the unit in the step's apply order
    pub index: usize,
    pub category: Category,
    pub name: String,
}

impl UnitCursor {
    fn unit(&self) -> Unit {
        Unit::new(self.category, self.name.as_str())
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Owner of the run-state for the duration of a run
///
/// Every mutation is saved before returning, so the file on disk always
/// reflects exactly the work that has completed.
#[derive(Debug)]
pub struct RunTracker {
    path: PathBuf,
    state: RunState,
}

impl RunTracker {
    /// Open the tracker for `data_dir`.
    ///
    /// When `resume` is false any saved state is ignored and will be
    /// overwritten by the first save.
    pub fn open(data_dir: &Path, resume: bool) -> Result<Self, StateError> {
        let path = data_dir.join(STATE_FILE);
        let state = if resume {
            Self::load(&path)?.unwrap_or_default()
        } else {
            RunState::default()
        };
        Ok(Self { path, state })
    }

    /// Read a state file, or `None` if it does not exist
    pub fn load(path: &Path) -> Result<Option<RunState>, StateError> {
        if !path.exists() {
            log::debug!("Run-state file does not exist, starting fresh");
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state = toml::from_str(&content).map_err(|source| StateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        log::debug!("Loaded run-state from {}", path.display());
        Ok(Some(state))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Bind the tracker to `plan`, saving the plan fingerprint on a fresh run.
    ///
    /// A resumed state recorded for a different plan is rejected.
    pub fn begin(&mut self, plan: &ExecutionPlan) -> Result<(), ApplyError> {
        let labels = plan.labels();
        if self.state.is_fresh() {
            self.state.plan = labels;
            self.save()?;
            return Ok(());
        }
        if self.state.plan != labels {
            return Err(ApplyError::StaleState(format!(
                "saved plan [{}] differs from requested plan [{}]",
                self.state.plan.join(", "),
                labels.join(", ")
            )));
        }
        if self.state.completed_steps > labels.len() {
            return Err(ApplyError::StaleState(format!(
                "{} steps recorded as complete but the plan has {}",
                self.state.completed_steps,
                labels.len()
            )));
        }
        Ok(())
    }

    /// Whether a previous run already applied `step`
    pub fn skip_step(&self, step: &PlanStep) -> bool {
        step.position < self.state.completed_steps
    }

    /// Index of the first unit of `step` still to apply.
    ///
    /// `units` is the step's full apply order; the saved cursor must name the
    /// same unit at the same index.
    pub fn resume_point(&self, step: &PlanStep, units: &[Unit]) -> Result<usize, ApplyError> {
        let Some(cursor) = &self.state.cursor else {
            return Ok(0);
        };
        if cursor.step != step.position {
            return Err(ApplyError::StaleState(format!(
                "cursor is in step {} but step {} is next",
                cursor.step, step.position
            )));
        }
        match units.get(cursor.index) {
            Some(unit) if *unit == cursor.unit() => Ok(cursor.index + 1),
            _ => Err(ApplyError::StaleState(format!(
                "config '{}' no longer has {} at position {}",
                step.config,
                cursor.unit(),
                cursor.index
            ))),
        }
    }

    /// Units of the current step recorded as changed
    pub fn changed(&self) -> &[Unit] {
        &self.state.changed
    }

    /// Record that `unit` completed and save
    pub fn advance(
        &mut self,
        step: &PlanStep,
        index: usize,
        unit: &Unit,
        changed: bool,
    ) -> Result<(), StateError> {
        self.state.cursor = Some(UnitCursor {
            step: step.position,
            index,
            category: unit.category,
            name: unit.name.clone(),
        });
        if changed {
            self.state.changed.push(unit.clone());
        }
        self.save()
    }

    /// Record that every unit of `step` completed and save
    pub fn complete_step(&mut self, step: &PlanStep) -> Result<(), StateError> {
        self.state.completed_steps = step.position + 1;
        self.state.cursor = None;
        self.state.changed.clear();
        self.save()
    }

    /// Write the state atomically
    pub fn save(&mut self) -> Result<(), StateError> {
        self.state.updated_at = Utc::now();
        let content = toml::to_string_pretty(&self.state)?;

        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
        temp.write_all(content.as_bytes()).map_err(io_err)?;
        temp.persist(&self.path).map_err(|e| io_err(e.error))?;

        log::trace!("Saved run-state to {}", self.path.display());
        Ok(())
    }

    /// Remove the state file after a full traversal
    pub fn clear(&mut self) -> Result<(), StateError> {
        self.state = RunState::default();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Cleared run-state {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
