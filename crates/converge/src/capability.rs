//! The host interface the converger drives.
//!
//! Every OS-level effect goes through [`Capabilities`], so the apply engine
//! can be exercised against an in-memory fake.

use anyhow::Result;
use indexmap::IndexMap;
use metadata::{Authentication, CommandLine, InitSystem, PackageManager, VersionSpec};
use std::path::Path;
use std::time::Duration;

/// A user to create or update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRequest<'a> {
    pub name: &'a str,
    pub uid: Option<u32>,
    pub groups: &'a [String],
    pub home_dir: Option<&'a str>,
}

/// Desired state of a regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest<'a> {
    pub path: &'a Path,
    pub contents: &'a [u8],
    /// Permission bits; `None` leaves the mode of an existing file alone
    pub mode: Option<u32>,
    pub owner: Option<&'a str>,
    pub group: Option<&'a str>,
}

/// Desired state of a symbolic link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkRequest<'a> {
    pub path: &'a Path,
    pub target: &'a str,
    pub owner: Option<&'a str>,
    pub group: Option<&'a str>,
}

/// A process to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest<'a> {
    pub line: &'a CommandLine,
    /// Merged over the agent's environment, never replacing it
    pub env: &'a IndexMap<String, String>,
    pub cwd: Option<&'a str>,
}

impl<'a> CommandRequest<'a> {
    pub fn new(line: &'a CommandLine, env: &'a IndexMap<String, String>, cwd: Option<&'a str>) -> Self {
        Self { line, env, cwd }
    }
}

/// Observed state of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    pub running: bool,
    pub enabled: bool,
}

/// Changes to make to a service; `None` fields are left alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceRequest {
    pub enabled: Option<bool>,
    pub running: Option<bool>,
    /// Stop then start, even when already running
    pub restart: bool,
}

impl ServiceRequest {
    pub fn is_noop(&self) -> bool {
        self.enabled.is_none() && self.running.is_none() && !self.restart
    }
}

/// OS-level effects used while converging a host
///
/// Methods returning `bool` report whether the host was actually modified;
/// the converger only records changes the backend reports.
pub trait Capabilities: Send + Sync {
    /// Ensure a package is installed at an acceptable version
    fn install_package(
        &self,
        manager: PackageManager,
        name: &str,
        versions: &VersionSpec,
    ) -> Result<bool>;

    /// Whether a group exists on the host already
    fn group_exists(&self, name: &str) -> Result<bool>;

    /// Create a group if absent
    fn ensure_group(&self, name: &str, gid: Option<u32>) -> Result<bool>;

    /// Create a user if absent, or add missing supplementary groups
    fn ensure_user(&self, user: &UserRequest<'_>) -> Result<bool>;

    /// Download and unpack an archive into `dir`
    fn extract_archive(&self, uri: &str, dir: &Path, auth: Option<&Authentication>)
    -> Result<bool>;

    /// Fetch remote file contents
    fn fetch_content(&self, uri: &str, auth: Option<&Authentication>) -> Result<Vec<u8>>;

    fn write_file(&self, file: &FileRequest<'_>) -> Result<bool>;

    fn ensure_symlink(&self, link: &SymlinkRequest<'_>) -> Result<bool>;

    /// Run a command to completion and return its exit code
    fn run_command(&self, command: &CommandRequest<'_>) -> Result<i32>;

    /// Launch a command without waiting for it
    fn spawn_command(&self, command: &CommandRequest<'_>) -> Result<()>;

    fn service_status(&self, system: InitSystem, name: &str) -> Result<ServiceStatus>;

    fn set_service_state(
        &self,
        system: InitSystem,
        name: &str,
        request: &ServiceRequest,
    ) -> Result<()>;

    /// Block for `duration`; overridden by fakes
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
