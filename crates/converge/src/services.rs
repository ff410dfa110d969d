//! Service restart triggers and state planning.

use crate::capability::{ServiceRequest, ServiceStatus};
use crate::unit::{Category, Unit};
use metadata::Service;
use std::collections::HashSet;

/// Whether any resource `service` depends on changed in the current config.
///
/// Triggers are matched by unit: file paths, source directories,
/// `manager:name` packages and command names.
pub fn triggered(service: &Service, changed: &HashSet<Unit>) -> Option<Unit> {
    let files = service
        .files
        .iter()
        .map(|path| Unit::new(Category::Files, path.as_str()));
    let sources = service
        .sources
        .iter()
        .map(|dir| Unit::new(Category::Sources, dir.as_str()));
    let packages = service.packages.iter().flat_map(|(manager, names)| {
        names.iter().map(|name| Unit::package(*manager, name))
    });
    let commands = service
        .commands
        .iter()
        .map(|name| Unit::new(Category::Commands, name.as_str()));

    files
        .chain(sources)
        .chain(packages)
        .chain(commands)
        .find(|unit| changed.contains(unit))
}

/// Work out what to ask of the service manager, if anything.
///
/// A triggered service is restarted only when it should end up running. A
/// service that is already in its declared state and untouched by triggers
/// yields `None`.
pub fn plan(service: &Service, status: ServiceStatus, triggered: bool) -> Option<ServiceRequest> {
    let start = service.ensure_running == Some(true) && !status.running;
    let stop = service.ensure_running == Some(false) && status.running;
    let should_run = service.ensure_running.unwrap_or(status.running);
    let restart = !start && triggered && should_run;

    let request = ServiceRequest {
        enabled: service.enabled.filter(|enabled| *enabled != status.enabled),
        running: if stop {
            Some(false)
        } else if start {
            Some(true)
        } else {
            None
        },
        restart,
    };

    (!request.is_noop()).then_some(request)
}
