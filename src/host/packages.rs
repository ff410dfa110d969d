//! Package installation through the host's package managers.
//!
//! Every manager follows the same shape: query the installed version, accept
//! it when the requested versions allow it, otherwise install the preferred
//! version.

use crate::runner;
use anyhow::{Context, Result, bail};
use metadata::{PackageManager, VersionSpec};
use std::process::{Command, Stdio};

/// Ensure `name` is installed at a version `versions` accepts
pub fn install(manager: PackageManager, name: &str, versions: &VersionSpec) -> Result<bool> {
    match manager {
        PackageManager::Apt => apt(name, versions),
        PackageManager::Yum => yum(name, versions),
        PackageManager::Rpm => rpm(name, versions),
        PackageManager::Python => pip(name, versions),
        PackageManager::Rubygems => gem(name, versions),
        PackageManager::Msi => msi(name, versions),
    }
}

/// Whether an installed version satisfies the request
fn satisfied(installed: Option<&str>, versions: &VersionSpec) -> bool {
    installed.is_some_and(|version| versions.accepts(version))
}

fn apt(name: &str, versions: &VersionSpec) -> Result<bool> {
    let installed = runner::run_capture("dpkg-query", &["-W", "-f=${Version}", name])
        .ok()
        .filter(|v| !v.is_empty());
    if satisfied(installed.as_deref(), versions) {
        return Ok(false);
    }

    let target = with_version(name, versions.preferred(), "=");
    let status = Command::new("apt-get")
        .args(["install", "-y", "-q", &target])
        .env("DEBIAN_FRONTEND", "noninteractive")
        .stdin(Stdio::null())
        .status()
        .context("Failed to execute apt-get")?;
    if !status.success() {
        bail!("apt-get install {target} exited with {status}");
    }
    log::info!("Installed {target} with apt");
    Ok(true)
}

fn yum(name: &str, versions: &VersionSpec) -> Result<bool> {
    if satisfied(rpm_version(name).as_deref(), versions) {
        return Ok(false);
    }

    let target = with_version(name, versions.preferred(), "-");
    runner::run_checked("yum", &["install", "-y", &target])?;
    log::info!("Installed {target} with yum");
    Ok(true)
}

/// `rpm` entries may name a package file or URL in place of a version
fn rpm(name: &str, versions: &VersionSpec) -> Result<bool> {
    let installed = rpm_version(name);
    let location = match versions.preferred() {
        Some(location) if is_location(location) => {
            if installed.is_some() {
                return Ok(false);
            }
            location
        }
        _ if satisfied(installed.as_deref(), versions) => return Ok(false),
        _ => name,
    };

    runner::run_checked("rpm", &["-U", "--quiet", location])?;
    log::info!("Installed {name} from {location}");
    Ok(true)
}

fn rpm_version(name: &str) -> Option<String> {
    runner::run_capture("rpm", &["-q", "--qf", "%{VERSION}-%{RELEASE}", name]).ok()
}

fn pip(name: &str, versions: &VersionSpec) -> Result<bool> {
    let pip = if runner::command_exists("pip3") { "pip3" } else { "pip" };
    let installed = runner::run_capture(pip, &["show", name])
        .ok()
        .and_then(|out| field(&out, "Version"));
    if satisfied(installed.as_deref(), versions) {
        return Ok(false);
    }

    let target = with_version(name, versions.preferred(), "==");
    runner::run_checked(pip, &["install", "--quiet", &target])?;
    log::info!("Installed {target} with {pip}");
    Ok(true)
}

fn gem(name: &str, versions: &VersionSpec) -> Result<bool> {
    let installed = runner::run_capture("gem", &["list", "--exact", "--local", name])
        .ok()
        .and_then(|out| gem_versions(&out, name));
    let accepted = installed
        .unwrap_or_default()
        .iter()
        .any(|version| versions.accepts(version));
    if accepted {
        return Ok(false);
    }

    let mut args = vec!["install", "--no-document", name];
    if let Some(version) = versions.preferred() {
        args.extend(["--version", version]);
    }
    runner::run_checked("gem", &args)?;
    log::info!("Installed gem {name}");
    Ok(true)
}

/// Registry roots listing installed products, native and 32-bit views
#[cfg(windows)]
const UNINSTALL_KEYS: [&str; 2] = [
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
    r"HKLM\SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
];

/// `msi` entries name the product, by display name or product code, and map
/// it to the installer location
#[cfg(windows)]
fn msi(name: &str, versions: &VersionSpec) -> Result<bool> {
    let installed = UNINSTALL_KEYS.iter().any(|key| {
        runner::run_capture("reg", &["query", key, "/s", "/v", "DisplayName"])
            .is_ok_and(|out| product_listed(&out, name))
    });
    if installed {
        log::debug!("{name} is already installed");
        return Ok(false);
    }

    let location = versions.preferred().unwrap_or(name);
    runner::run_checked("msiexec", &["/i", location, "/qn", "/norestart"])?;
    log::info!("Installed {name} from {location}");
    Ok(true)
}

/// Whether `reg query ... /s /v DisplayName` output lists `name` as a
/// product key or display name
#[cfg(any(windows, test))]
fn product_listed(output: &str, name: &str) -> bool {
    output.lines().any(|line| {
        if line.starts_with("HKEY_") {
            return line
                .rsplit('\\')
                .next()
                .is_some_and(|key| key.trim().eq_ignore_ascii_case(name));
        }
        let mut parts = line.trim().splitn(3, "    ");
        match (parts.next(), parts.next(), parts.next()) {
            (Some("DisplayName"), Some(kind), Some(value)) if kind.starts_with("REG_") => {
                value.trim().eq_ignore_ascii_case(name)
            }
            _ => false,
        }
    })
}

#[cfg(not(windows))]
fn msi(name: &str, _versions: &VersionSpec) -> Result<bool> {
    bail!("msi package {name} can only be installed on Windows")
}

fn with_version(name: &str, version: Option<&str>, separator: &str) -> String {
    match version {
        Some(version) => format!("{name}{separator}{version}"),
        None => name.to_string(),
    }
}

fn is_location(value: &str) -> bool {
    value.contains("://") || value.starts_with('/') || value.ends_with(".rpm")
}

/// Value of a `Key: value` line
fn field(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim().to_string())
    })
}

/// Versions from a `gem list` line such as `rake (13.0.6, 12.3.3)`
fn gem_versions(output: &str, name: &str) -> Option<Vec<String>> {
    let line = output
        .lines()
        .find(|line| line.split_whitespace().next() == Some(name))?;
    let inner = line.split_once('(')?.1.trim_end().trim_end_matches(')');
    Some(
        inner
            .split(',')
            .map(|v| v.trim().trim_start_matches("default: ").to_string())
            .filter(|v| !v.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: serde_json::Value) -> VersionSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_satisfied() {
        let any = spec(serde_json::json!([]));
        assert!(satisfied(Some("1.2.3"), &any));
        assert!(!satisfied(None, &any));

        let pinned = spec(serde_json::json!("1.18"));
        assert!(satisfied(Some("1.18.0-1ubuntu1"), &pinned));
        assert!(!satisfied(Some("1.20.1"), &pinned));
    }

    #[test]
    fn test_with_version() {
        assert_eq!(with_version("nginx", Some("1.18"), "="), "nginx=1.18");
        assert_eq!(with_version("flask", None, "=="), "flask");
    }

    #[test]
    fn test_is_location() {
        assert!(is_location("https://mirror/pkg.rpm"));
        assert!(is_location("/tmp/pkg.rpm"));
        assert!(!is_location("1.2.3"));
    }

    #[test]
    fn test_pip_show_field() {
        let out = "Name: Flask\nVersion: 2.3.2\nSummary: A web framework";
        assert_eq!(field(out, "Version").as_deref(), Some("2.3.2"));
        assert_eq!(field(out, "Location"), None);
    }

    #[test]
    fn test_gem_versions() {
        let out = "rake (13.0.6, default: 12.3.3)\nrake-compiler (1.2.1)";
        assert_eq!(gem_versions(out, "rake").unwrap(), ["13.0.6", "12.3.3"]);
        assert_eq!(gem_versions("", "rake"), None);
    }

    #[test]
    fn test_product_listed() {
        let out = "\r
HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\{B7A0CE06-068E-11E6-8E2F-0A3F0F5A5F9B}\r
    DisplayName    REG_SZ    Amazon SSM Agent\r
\r
HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\7-Zip\r
    DisplayName    REG_SZ    7-Zip 23.01 (x64)\r
\r
End of search: 2 match(es) found.\r
";
        assert!(product_listed(out, "Amazon SSM Agent"));
        assert!(product_listed(out, "amazon ssm agent"));
        assert!(product_listed(out, "{b7a0ce06-068e-11e6-8e2f-0a3f0f5a5f9b}"));
        assert!(product_listed(out, "7-Zip"));
        assert!(!product_listed(out, "Amazon SSM"));
        assert!(!product_listed(out, "REG_SZ"));
        assert!(!product_listed("End of search: 0 match(es) found.", "awscli"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_msi_is_windows_only() {
        assert!(install(PackageManager::Msi, "app", &spec(serde_json::json!([]))).is_err());
    }
}
