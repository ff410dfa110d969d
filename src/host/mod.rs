//! The real host: package managers, accounts, files, processes and services.

pub mod accounts;
pub mod archive;
pub mod credentials;
pub mod http;
pub mod packages;
pub mod services;
pub mod sigv4;

use crate::runner;
use anyhow::{Context, Result};
use converge::{
    Capabilities, CommandRequest, FileRequest, ServiceRequest, ServiceStatus, SymlinkRequest,
    UserRequest,
};
use http::HttpClient;
use metadata::{Authentication, InitSystem, PackageManager, VersionSpec};
use std::path::Path;

/// [`Capabilities`] backed by the operating system
#[derive(Debug, Clone, Default)]
pub struct SystemHost {
    http: HttpClient,
}

impl SystemHost {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

impl Capabilities for SystemHost {
    fn install_package(
        &self,
        manager: PackageManager,
        name: &str,
        versions: &VersionSpec,
    ) -> Result<bool> {
        packages::install(manager, name, versions)
    }

    fn group_exists(&self, name: &str) -> Result<bool> {
        Ok(accounts::group_exists(name))
    }

    fn ensure_group(&self, name: &str, gid: Option<u32>) -> Result<bool> {
        accounts::ensure_group(name, gid)
    }

    fn ensure_user(&self, user: &UserRequest<'_>) -> Result<bool> {
        accounts::ensure_user(user)
    }

    fn extract_archive(
        &self,
        uri: &str,
        dir: &Path,
        auth: Option<&Authentication>,
    ) -> Result<bool> {
        archive::extract(&self.http, uri, dir, auth)
    }

    fn fetch_content(&self, uri: &str, auth: Option<&Authentication>) -> Result<Vec<u8>> {
        self.http.get_bytes(uri, auth)
    }

    fn write_file(&self, file: &FileRequest<'_>) -> Result<bool> {
        let written = converge::fs::write_atomic(file.path, file.contents, file.mode)
            .with_context(|| format!("Failed to write {}", file.path.display()))?;
        let owned = accounts::apply_ownership(file.path, file.owner, file.group)?;
        if written {
            log::info!("Wrote {}", file.path.display());
        }
        Ok(written || owned)
    }

    fn ensure_symlink(&self, link: &SymlinkRequest<'_>) -> Result<bool> {
        let linked = converge::fs::ensure_symlink(link.path, Path::new(link.target))
            .with_context(|| format!("Failed to link {}", link.path.display()))?;
        let owned = accounts::apply_ownership(link.path, link.owner, link.group)?;
        if linked {
            log::info!("Linked {} -> {}", link.path.display(), link.target);
        }
        Ok(linked || owned)
    }

    fn run_command(&self, command: &CommandRequest<'_>) -> Result<i32> {
        log::debug!("Running: {}", command.line);
        let status = runner::metadata_command(command)?
            .status()
            .with_context(|| format!("Failed to execute: {}", command.line))?;
        Ok(runner::exit_code(status))
    }

    fn spawn_command(&self, command: &CommandRequest<'_>) -> Result<()> {
        log::debug!("Spawning: {}", command.line);
        runner::metadata_command(command)?
            .spawn()
            .with_context(|| format!("Failed to execute: {}", command.line))?;
        Ok(())
    }

    fn service_status(&self, system: InitSystem, name: &str) -> Result<ServiceStatus> {
        services::status(system, name)
    }

    fn set_service_state(
        &self,
        system: InitSystem,
        name: &str,
        request: &ServiceRequest,
    ) -> Result<()> {
        services::apply(system, name, request)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use metadata::CommandLine;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_reports_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("etc/app.conf");
        let host = SystemHost::default();
        let request = FileRequest {
            path: &path,
            contents: b"port = 80\n",
            mode: Some(0o600),
            owner: None,
            group: None,
        };

        assert!(host.write_file(&request).unwrap());
        assert!(!host.write_file(&request).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"port = 80\n");
    }

    #[test]
    fn test_symlink() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("current");
        let host = SystemHost::default();
        let request = SymlinkRequest {
            path: &path,
            target: "/opt/app-1.2",
            owner: None,
            group: None,
        };

        assert!(host.ensure_symlink(&request).unwrap());
        assert!(!host.ensure_symlink(&request).unwrap());
        assert_eq!(
            std::fs::read_link(&path).unwrap(),
            Path::new("/opt/app-1.2")
        );
    }

    #[test]
    fn test_run_command_exit_code() {
        let host = SystemHost::default();
        let env = IndexMap::new();
        let ok = CommandLine::Shell("true".into());
        let failing = CommandLine::Shell("exit 3".into());

        assert_eq!(host.run_command(&CommandRequest::new(&ok, &env, None)).unwrap(), 0);
        assert_eq!(
            host.run_command(&CommandRequest::new(&failing, &env, None)).unwrap(),
            3
        );
    }
}
