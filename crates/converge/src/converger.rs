//! The apply engine.
//!
//! Walks an [`ExecutionPlan`] step by step, applying each config's units in
//! category order through a [`Capabilities`] backend, and advancing the
//! [`RunTracker`] after every unit.

use crate::capability::{
    Capabilities, CommandRequest, FileRequest, SymlinkRequest, UserRequest,
};
use crate::error::{ApplyError, ConvergeError};
use crate::files::{self, ContentSource};
use crate::report::ApplyReport;
use crate::services;
use crate::state::RunTracker;
use crate::unit::{self, Action, Unit};
use metadata::{
    Authentication, Command, CommandLine, Config, ExecutionPlan, File, Metadata, PlanStep, User,
    WaitPolicy,
};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Cooperative cancellation, checked between configs
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What applying one unit did
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Changed,
    Unchanged,
    /// A command whose `test` exited nonzero
    Skipped,
    /// A command that failed under `ignoreErrors`
    Ignored(String),
}

/// A fatal failure inside a step, before the report is attached
struct StepFailure {
    unit: Option<Unit>,
    source: ApplyError,
}

impl StepFailure {
    fn at(unit: &Unit, source: impl Into<ApplyError>) -> Self {
        Self {
            unit: Some(unit.clone()),
            source: source.into(),
        }
    }
}

impl From<ApplyError> for StepFailure {
    fn from(source: ApplyError) -> Self {
        Self { unit: None, source }
    }
}

/// Remote file contents fetched ahead of the writes, keyed by file path
type Prefetched = HashMap<String, anyhow::Result<Vec<u8>>>;

/// Applies execution plans to a host
pub struct Converger<'a, C: Capabilities + ?Sized> {
    caps: &'a C,
    tracker: &'a mut RunTracker,
    cancel: CancelToken,
    /// Groups created or confirmed to exist during this run
    known_groups: HashSet<String>,
}

impl<'a, C: Capabilities + ?Sized> Converger<'a, C> {
    pub fn new(caps: &'a C, tracker: &'a mut RunTracker) -> Self {
        Self {
            caps,
            tracker,
            cancel: CancelToken::default(),
            known_groups: HashSet::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply every step of `plan`, skipping work a resumed run already did.
    ///
    /// A fatal unit failure stops the whole plan; changes made so far are
    /// kept and the run-state cursor points just before the failed unit.
    /// After a full traversal the run-state is cleared.
    pub fn apply(
        &mut self,
        plan: &ExecutionPlan,
        metadata: &Metadata,
    ) -> Result<ApplyReport, ConvergeError> {
        let mut report = ApplyReport::default();

        if let Err(source) = self.tracker.begin(plan) {
            return Err(ConvergeError {
                step: None,
                unit: None,
                source,
                report,
            });
        }

        for step in plan.steps() {
            if self.cancel.is_cancelled() {
                log::warn!("Run cancelled before {step}");
                report.cancelled = true;
                return Ok(report);
            }

            if self.tracker.skip_step(step) {
                log::info!("Skipping {step}: already applied");
                report.steps_skipped += 1;
                continue;
            }

            let result = match metadata.init.config(&step.config) {
                Some(config) => self.apply_step(step, config, metadata, &mut report),
                None => Err(ApplyError::MissingConfig(step.config.clone()).into()),
            };
            if let Err(StepFailure { unit, source }) = result {
                return Err(ConvergeError {
                    step: Some(step.clone()),
                    unit,
                    source,
                    report,
                });
            }
            report.steps_applied += 1;
        }

        if let Err(e) = self.tracker.clear() {
            return Err(ConvergeError {
                step: None,
                unit: None,
                source: e.into(),
                report,
            });
        }
        Ok(report)
    }

    fn apply_step(
        &mut self,
        step: &PlanStep,
        config: &Config,
        metadata: &Metadata,
        report: &mut ApplyReport,
    ) -> Result<(), StepFailure> {
        let actions = unit::actions(config);
        let units: Vec<Unit> = actions.iter().map(Action::unit).collect();

        let start = self.tracker.resume_point(step, &units)?;
        if start > 0 {
            log::info!("Resuming {step} at unit {} of {}", start + 1, units.len());
        } else {
            log::info!("Applying {step}");
        }

        // Changes recorded before an interruption still fire service triggers
        let mut changed: HashSet<Unit> = self.tracker.changed().iter().cloned().collect();
        let mut prefetched = self.prefetch(&actions[start..], metadata);

        for (index, action) in actions.iter().enumerate().skip(start) {
            let unit = &units[index];
            let unit_changed = match self.apply_action(action, metadata, &changed, &mut prefetched)
            {
                Ok(Outcome::Changed) => {
                    log::info!("Changed {unit}");
                    report.record_change(&step.config, unit.clone());
                    true
                }
                Ok(Outcome::Unchanged) => {
                    log::debug!("Unchanged {unit}");
                    false
                }
                Ok(Outcome::Skipped) => {
                    report.record_skip(&step.config, unit.clone());
                    false
                }
                Ok(Outcome::Ignored(error)) => {
                    log::warn!("Ignoring failure of {unit}: {error}");
                    report.record_change(&step.config, unit.clone());
                    report.record_ignored(&step.config, unit.clone(), error);
                    true
                }
                Err(e) if e.is_recoverable() => {
                    log::error!("Skipping {unit}: {e}");
                    report.record_failure(&step.config, unit.clone(), &e);
                    false
                }
                Err(e) => return Err(StepFailure::at(unit, e)),
            };

            if unit_changed {
                changed.insert(unit.clone());
            }
            self.tracker
                .advance(step, index, unit, unit_changed)
                .map_err(|e| StepFailure::at(unit, e))?;
        }

        self.tracker
            .complete_step(step)
            .map_err(|e| StepFailure::from(ApplyError::from(e)))?;
        Ok(())
    }

    fn apply_action(
        &mut self,
        action: &Action<'_>,
        metadata: &Metadata,
        changed: &HashSet<Unit>,
        prefetched: &mut Prefetched,
    ) -> Result<Outcome, ApplyError> {
        match *action {
            Action::Group { name, spec } => {
                let gid = parse_id(name, spec.gid.as_deref())?;
                let created = self.caps.ensure_group(name, gid)?;
                self.known_groups.insert(name.to_string());
                Ok(outcome(created))
            }
            Action::User { name, spec } => self.apply_user(name, spec),
            Action::Package {
                manager,
                name,
                versions,
            } => Ok(outcome(self.caps.install_package(manager, name, versions)?)),
            Action::Source { dir, uri } => {
                let auth = metadata.authentication_for_uri(uri).map(|(_, auth)| auth);
                Ok(outcome(self.caps.extract_archive(uri, Path::new(dir), auth)?))
            }
            Action::File { path, spec } => self.apply_file(path, spec, metadata, prefetched),
            Action::Command { name, spec } => self.apply_command(name, spec),
            Action::Service { system, name, spec } => {
                let trigger = services::triggered(spec, changed);
                let status = self.caps.service_status(system, name)?;
                match services::plan(spec, status, trigger.is_some()) {
                    None => Ok(Outcome::Unchanged),
                    Some(request) => {
                        if let Some(trigger) = trigger.filter(|_| request.restart) {
                            log::info!("Restarting {system} service {name}: {trigger} changed");
                        }
                        self.caps.set_service_state(system, name, &request)?;
                        Ok(Outcome::Changed)
                    }
                }
            }
        }
    }

    fn apply_user(&mut self, name: &str, spec: &User) -> Result<Outcome, ApplyError> {
        for group in &spec.groups {
            if self.known_groups.contains(group) {
                continue;
            }
            if !self.caps.group_exists(group)? {
                return Err(ApplyError::DependencyMissing {
                    user: name.to_string(),
                    group: group.clone(),
                });
            }
            self.known_groups.insert(group.clone());
        }

        let request = UserRequest {
            name,
            uid: parse_id(name, spec.uid.as_deref())?,
            groups: &spec.groups,
            home_dir: spec.home_dir.as_deref(),
        };
        Ok(outcome(self.caps.ensure_user(&request)?))
    }

    fn apply_file(
        &self,
        path: &str,
        spec: &File,
        metadata: &Metadata,
        prefetched: &mut Prefetched,
    ) -> Result<Outcome, ApplyError> {
        let target = Path::new(path);
        if !target.is_absolute() {
            return Err(ApplyError::InvalidPath {
                path: path.to_string(),
            });
        }

        let mode = spec
            .mode
            .as_deref()
            .map(|mode| files::parse_mode(path, mode))
            .transpose()?;

        if mode.is_some_and(|mode| mode.symlink) {
            let link_target = files::link_target(path, spec)?;
            let request = SymlinkRequest {
                path: target,
                target: &link_target,
                owner: spec.owner.as_deref(),
                group: spec.group.as_deref(),
            };
            return Ok(outcome(self.caps.ensure_symlink(&request)?));
        }

        let contents = match files::content_source(path, spec)? {
            ContentSource::Inline(bytes) => bytes,
            ContentSource::Remote(uri) => match prefetched.remove(path) {
                Some(fetched) => fetched?,
                None => {
                    let auth = file_auth(path, spec, uri, metadata)?;
                    self.caps.fetch_content(uri, auth)?
                }
            },
        };

        let request = FileRequest {
            path: target,
            contents: &contents,
            mode: mode.map(|mode| mode.permissions),
            owner: spec.owner.as_deref(),
            group: spec.group.as_deref(),
        };
        Ok(outcome(self.caps.write_file(&request)?))
    }

    fn apply_command(&self, name: &str, spec: &Command) -> Result<Outcome, ApplyError> {
        let cwd = spec.cwd.as_deref();

        if let Some(test) = &spec.test {
            let test = CommandLine::Shell(test.clone());
            let code = self
                .caps
                .run_command(&CommandRequest::new(&test, &spec.env, cwd))?;
            if code != 0 {
                log::info!("Skipping command '{name}': test exited with {code}");
                return Ok(Outcome::Skipped);
            }
        }

        let request = CommandRequest::new(&spec.command, &spec.env, cwd);
        if spec.wait_after_completion == WaitPolicy::Forever {
            log::info!("Launching command '{name}' without waiting");
            self.caps.spawn_command(&request)?;
            return Ok(Outcome::Changed);
        }

        let code = self.caps.run_command(&request)?;
        let result = match code {
            0 => Outcome::Changed,
            code if spec.ignore_errors => Outcome::Ignored(format!("exit code {code}")),
            code => {
                return Err(ApplyError::CommandFailed {
                    name: name.to_string(),
                    code,
                });
            }
        };

        if let WaitPolicy::Seconds(secs) = spec.wait_after_completion {
            log::info!("Waiting {secs}s after command '{name}'");
            self.caps.pause(Duration::from_secs(secs));
        }
        Ok(result)
    }

    /// Fetch the remote contents of every pending file concurrently.
    ///
    /// Failures are kept per file and surface when that file is applied, so
    /// write order and error attribution are unaffected.
    fn prefetch(&self, actions: &[Action<'_>], metadata: &Metadata) -> Prefetched {
        let remote: Vec<(&str, &str, Option<&Authentication>)> = actions
            .iter()
            .filter_map(|action| match *action {
                Action::File { path, spec } if !is_symlink(spec) => {
                    match files::content_source(path, spec) {
                        Ok(ContentSource::Remote(uri)) => file_auth(path, spec, uri, metadata)
                            .ok()
                            .map(|auth| (path, uri, auth)),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect();

        if remote.is_empty() {
            return HashMap::new();
        }
        log::debug!("Prefetching {} remote files", remote.len());

        let caps = self.caps;
        remote
            .par_iter()
            .map(|&(path, uri, auth)| (path.to_string(), caps.fetch_content(uri, auth)))
            .collect()
    }
}

fn outcome(changed: bool) -> Outcome {
    if changed {
        Outcome::Changed
    } else {
        Outcome::Unchanged
    }
}

fn is_symlink(spec: &File) -> bool {
    spec.mode
        .as_deref()
        .and_then(|mode| files::parse_mode("", mode).ok())
        .is_some_and(|mode| mode.symlink)
}

/// The authentication profile for a remote file: the named one, or the first
/// whose URIs or buckets cover `uri`.
fn file_auth<'m>(
    path: &str,
    spec: &File,
    uri: &str,
    metadata: &'m Metadata,
) -> Result<Option<&'m Authentication>, ApplyError> {
    match spec.authentication.as_deref() {
        Some(name) => metadata
            .authentication(name)
            .map(Some)
            .ok_or_else(|| ApplyError::InvalidSpec {
                unit: path.to_string(),
                reason: format!("unknown authentication profile '{name}'"),
            }),
        None => Ok(metadata.authentication_for_uri(uri).map(|(_, auth)| auth)),
    }
}

fn parse_id(unit: &str, id: Option<&str>) -> Result<Option<u32>, ApplyError> {
    id.map(|id| {
        id.trim().parse::<u32>().map_err(|_| ApplyError::InvalidSpec {
            unit: unit.to_string(),
            reason: format!("'{id}' is not a numeric id"),
        })
    })
    .transpose()
}
