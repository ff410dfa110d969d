//! Compare-then-write filesystem primitives.
//!
//! Each function inspects the current state first and only touches the disk
//! when something differs. The returned `bool` is `true` when a modification
//! actually happened. Writes go to a temporary file in the target directory
//! which is then renamed over the target, so readers never observe a
//! partially written file.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Mode given to newly created files when none is requested
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Ensure `path` holds exactly `contents`, with permission bits `mode`.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<bool> {
    let existing = fs::symlink_metadata(path).ok().filter(fs::Metadata::is_file);

    if let Some(meta) = &existing
        && fs::read(path)? == contents
    {
        return match mode {
            Some(mode) if permission_bits(meta) != Some(mode) => {
                set_mode(path, mode)?;
                log::debug!("Updated mode of {} to {:o}", path.display(), mode);
                Ok(true)
            }
            _ => Ok(false),
        };
    }

    let parent = parent_dir(path)?;
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    let mode = mode
        .or_else(|| existing.as_ref().and_then(permission_bits))
        .unwrap_or(DEFAULT_FILE_MODE);
    set_mode(temp.path(), mode)?;

    temp.persist(path).map_err(|e| e.error)?;
    log::debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(true)
}

/// Ensure `path` is a symbolic link pointing at `target`.
///
/// An existing file or link at `path` is replaced atomically; a directory is
/// never replaced.
pub fn ensure_symlink(path: &Path, target: &Path) -> io::Result<bool> {
    if let Ok(current) = fs::read_link(path)
        && current == target
    {
        return Ok(false);
    }
    if path.is_dir() && !path.is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} is a directory", path.display()),
        ));
    }

    let parent = parent_dir(path)?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{file_name}.{}.link", std::process::id()));
    if staging.is_symlink() || staging.exists() {
        fs::remove_file(&staging)?;
    }

    make_symlink(target, &staging)?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    log::debug!("Linked {} -> {}", path.display(), target.display());
    Ok(true)
}

/// Change ownership of `path` (not following symlinks) when it differs.
#[cfg(unix)]
pub fn set_owner(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::symlink_metadata(path)?;
    let uid = uid.filter(|uid| *uid != meta.uid());
    let gid = gid.filter(|gid| *gid != meta.gid());
    if uid.is_none() && gid.is_none() {
        return Ok(false);
    }

    std::os::unix::fs::lchown(path, uid, gid)?;
    log::debug!("Changed owner of {}", path.display());
    Ok(true)
}

#[cfg(not(unix))]
pub fn set_owner(_path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<bool> {
    Ok(false)
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no parent directory", path.display()),
            )
        })
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}
