//! Service control for sysvinit, systemd and Windows services.

use crate::runner;
use anyhow::Result;
use converge::{ServiceRequest, ServiceStatus};
use metadata::InitSystem;
use std::path::Path;

pub fn status(system: InitSystem, name: &str) -> Result<ServiceStatus> {
    let status = match system {
        InitSystem::Systemd => ServiceStatus {
            running: runner::run_quiet("systemctl", &["is-active", "--quiet", name]),
            enabled: runner::run_quiet("systemctl", &["is-enabled", "--quiet", name]),
        },
        InitSystem::Sysvinit => ServiceStatus {
            running: runner::run_quiet("service", &[name, "status"]),
            enabled: sysv_enabled(name),
        },
        InitSystem::Windows => {
            let query = runner::run_capture("sc.exe", &["query", name]).unwrap_or_default();
            let config = runner::run_capture("sc.exe", &["qc", name]).unwrap_or_default();
            ServiceStatus {
                running: query.contains("RUNNING"),
                enabled: windows_start_type(&config).is_some_and(|t| t != "DISABLED"),
            }
        }
    };
    log::debug!("{system}:{name} is {status:?}");
    Ok(status)
}

/// Apply a planned change; enablement first, then the run state
pub fn apply(system: InitSystem, name: &str, request: &ServiceRequest) -> Result<()> {
    if let Some(enabled) = request.enabled {
        set_enabled(system, name, enabled)?;
    }
    match (request.running, request.restart) {
        (Some(false), _) => control(system, name, Action::Stop)?,
        (_, true) => control(system, name, Action::Restart)?,
        (Some(true), false) => control(system, name, Action::Start)?,
        (None, false) => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

fn control(system: InitSystem, name: &str, action: Action) -> Result<()> {
    log::info!("Running {} for {system}:{name}", action.verb());
    match system {
        InitSystem::Systemd => runner::run_checked("systemctl", &[action.verb(), name]),
        InitSystem::Sysvinit => runner::run_checked("service", &[name, action.verb()]),
        InitSystem::Windows => match action {
            Action::Start => runner::run_checked("net", &["start", name]),
            Action::Stop => runner::run_checked("net", &["stop", name]),
            Action::Restart => {
                runner::run_checked("net", &["stop", name])?;
                runner::run_checked("net", &["start", name])
            }
        },
    }
}

fn set_enabled(system: InitSystem, name: &str, enabled: bool) -> Result<()> {
    log::info!(
        "{} {system}:{name}",
        if enabled { "Enabling" } else { "Disabling" }
    );
    match system {
        InitSystem::Systemd => {
            let verb = if enabled { "enable" } else { "disable" };
            runner::run_checked("systemctl", &[verb, name])
        }
        InitSystem::Sysvinit if runner::command_exists("chkconfig") => {
            runner::run_checked("chkconfig", &[name, if enabled { "on" } else { "off" }])
        }
        InitSystem::Sysvinit => {
            let verb = if enabled { "enable" } else { "disable" };
            runner::run_checked("update-rc.d", &[name, verb])
        }
        InitSystem::Windows => {
            let start = if enabled { "auto" } else { "disabled" };
            runner::run_checked("sc.exe", &["config", name, "start=", start])
        }
    }
}

fn sysv_enabled(name: &str) -> bool {
    if runner::command_exists("chkconfig") {
        return runner::run_quiet("chkconfig", &[name]);
    }
    runlevel_links(name, Path::new("/etc"))
}

/// Whether any `rcN.d` directory carries a start link for `name`
fn runlevel_links(name: &str, etc: &Path) -> bool {
    (0..=6).any(|level| {
        let dir = etc.join(format!("rc{level}.d"));
        std::fs::read_dir(dir).is_ok_and(|entries| {
            entries.flatten().any(|entry| {
                let file = entry.file_name();
                let file = file.to_string_lossy();
                file.strip_prefix('S').is_some_and(|rest| {
                    rest.trim_start_matches(|c: char| c.is_ascii_digit()) == name
                })
            })
        })
    })
}

/// `START_TYPE` from `sc qc` output, e.g. `AUTO_START`
fn windows_start_type(config: &str) -> Option<&str> {
    config.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "START_TYPE" {
            return None;
        }
        value.split_whitespace().nth(1)
    })
}
