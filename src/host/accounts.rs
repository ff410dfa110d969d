//! Local groups and users, plus owner/group resolution for files.

use crate::runner;
use anyhow::{Context, Result, bail};
use converge::UserRequest;
use std::path::Path;

pub fn group_exists(name: &str) -> bool {
    runner::run_quiet("getent", &["group", name])
}

pub fn ensure_group(name: &str, gid: Option<u32>) -> Result<bool> {
    if group_exists(name) {
        if let Some(gid) = gid
            && group_id(name)? != gid
        {
            log::warn!("Group {name} exists with a different gid than {gid}; leaving it");
        }
        return Ok(false);
    }

    let gid = gid.map(|gid| gid.to_string());
    let mut args = Vec::new();
    if let Some(gid) = &gid {
        args.extend(["-g", gid.as_str()]);
    }
    args.push(name);
    runner::run_checked("groupadd", &args)?;
    log::info!("Created group {name}");
    Ok(true)
}

/// Create a missing user, or add the supplementary groups it lacks
pub fn ensure_user(user: &UserRequest<'_>) -> Result<bool> {
    if !runner::run_quiet("id", &["-u", user.name]) {
        create_user(user)?;
        log::info!("Created user {}", user.name);
        return Ok(true);
    }

    let current = runner::run_capture("id", &["-nG", user.name])?;
    let missing = missing_groups(&current, user.groups);
    if missing.is_empty() {
        return Ok(false);
    }

    let joined = missing.join(",");
    runner::run_checked("usermod", &["-a", "-G", &joined, user.name])?;
    log::info!("Added {} to {joined}", user.name);
    Ok(true)
}

fn create_user(user: &UserRequest<'_>) -> Result<()> {
    let uid = user.uid.map(|uid| uid.to_string());
    let groups = user.groups.join(",");

    let mut args = vec!["-M", "-s", nologin_shell()];
    if let Some(uid) = &uid {
        args.extend(["-u", uid.as_str()]);
    }
    if let Some(home) = user.home_dir {
        args.extend(["-d", home]);
    }
    if !groups.is_empty() {
        args.extend(["-G", groups.as_str()]);
    }
    args.push(user.name);
    runner::run_checked("useradd", &args)
}

fn nologin_shell() -> &'static str {
    if Path::new("/sbin/nologin").exists() {
        "/sbin/nologin"
    } else {
        "/usr/sbin/nologin"
    }
}

/// Groups in `wanted` that do not appear in `id -nG` output
fn missing_groups<'a>(current: &str, wanted: &'a [String]) -> Vec<&'a str> {
    let current: Vec<&str> = current.split_whitespace().collect();
    wanted
        .iter()
        .map(String::as_str)
        .filter(|group| !current.contains(group))
        .collect()
}

/// Numeric uid of a user name, or the value itself when already numeric
pub fn user_id(name: &str) -> Result<u32> {
    if let Ok(id) = name.parse() {
        return Ok(id);
    }
    let out = runner::run_capture("id", &["-u", name])
        .with_context(|| format!("Unknown user: {name}"))?;
    parse_numeric(&out, name)
}

/// Numeric gid of a group name, or the value itself when already numeric
pub fn group_id(name: &str) -> Result<u32> {
    if let Ok(id) = name.parse() {
        return Ok(id);
    }
    let out = runner::run_capture("getent", &["group", name])
        .with_context(|| format!("Unknown group: {name}"))?;
    let gid = out.split(':').nth(2).unwrap_or_default();
    parse_numeric(gid, name)
}

fn parse_numeric(value: &str, name: &str) -> Result<u32> {
    match value.trim().parse() {
        Ok(id) => Ok(id),
        Err(_) => bail!("Could not resolve an id for {name}: {value:?}"),
    }
}

/// Apply owner and group to `path`; returns whether either changed
pub fn apply_ownership(path: &Path, owner: Option<&str>, group: Option<&str>) -> Result<bool> {
    if owner.is_none() && group.is_none() {
        return Ok(false);
    }
    let uid = owner.map(user_id).transpose()?;
    let gid = group.map(group_id).transpose()?;
    converge::fs::set_owner(path, uid, gid)
        .with_context(|| format!("Failed to set ownership of {}", path.display()))
}
