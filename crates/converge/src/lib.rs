//! # Converge
//!
//! Applies a resolved [`metadata::ExecutionPlan`] to a host.
//!
//! Each config is applied in a fixed category order (groups, users, packages,
//! sources, files, commands, services). Every OS-level effect goes through
//! the [`Capabilities`] trait, and progress is persisted by a [`RunTracker`]
//! after every unit so an interrupted run can resume where it stopped.
//!
//! ```ignore
//! let plan = metadata::resolve(&doc.init, &["default"])?;
//! let mut tracker = RunTracker::open(data_dir, resume)?;
//! let report = Converger::new(&host, &mut tracker).apply(&plan, &doc)?;
//! ```

pub mod capability;
pub mod converger;
pub mod error;
pub mod files;
pub mod fs;
pub mod report;
pub mod services;
pub mod state;
pub mod unit;

pub use capability::{
    Capabilities, CommandRequest, FileRequest, ServiceRequest, ServiceStatus, SymlinkRequest,
    UserRequest,
};
pub use converger::{CancelToken, Converger};
pub use error::{ApplyError, ConvergeError, StateError};
pub use report::{ApplyReport, Change, Failure};
pub use state::{RunState, RunTracker, STATE_FILE};
pub use unit::{Category, Unit};
