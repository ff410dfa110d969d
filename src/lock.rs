//! Exclusive lock on the data directory for the duration of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOCK_FILENAME: &str = ".lock";

/// Who holds the lock, written into the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub command: String,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "Another run holds the lock: {command} (PID {pid}, started {started_at})\n\
         Wait for it to finish; the lock is released when that process exits:\n  {lock_path}"
    )]
    Contention {
        command: String,
        pid: u32,
        started_at: DateTime<Utc>,
        lock_path: PathBuf,
    },

    #[error(
        "Another run holds the lock (could not read its metadata)\n\
         Wait for it to finish; the lock is released when that process exits:\n  {lock_path}"
    )]
    ContentionUnknown { lock_path: PathBuf },

    #[error("Failed to lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held lock.
///
/// The advisory lock lives on the open file, so the kernel releases it when
/// the handle closes, including when the process dies without unwinding. The
/// file itself stays behind and only carries holder metadata.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(data_dir: &Path, command: &str) -> Result<Self, LockError> {
        let path = data_dir.join(LOCK_FILENAME);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(data_dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(contention(&path)),
            Err(TryLockError::Error(e)) => return Err(io_err(e)),
        }

        let metadata = LockMetadata {
            pid: std::process::id(),
            started_at: Utc::now(),
            command: command.to_string(),
        };
        write_metadata(&file, &metadata).map_err(io_err)?;

        log::debug!("Acquired lock {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to unlock {}: {e}", self.path.display());
        }
    }
}

fn write_metadata(file: &File, metadata: &LockMetadata) -> io::Result<()> {
    file.set_len(0)?;
    let mut writer = io::BufWriter::new(file);
    writer.seek(SeekFrom::Start(0))?;
    serde_json::to_writer_pretty(&mut writer, metadata).map_err(io::Error::other)?;
    writer.flush()
}

fn contention(path: &Path) -> LockError {
    let metadata = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<LockMetadata>(&raw).ok());

    match metadata {
        Some(meta) => LockError::Contention {
            command: meta.command,
            pid: meta.pid,
            started_at: meta.started_at,
            lock_path: path.to_path_buf(),
        },
        None => LockError::ContentionUnknown {
            lock_path: path.to_path_buf(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    /// Holder metadata, read through the locked handle
    fn held(lock: &RunLock) -> LockMetadata {
        let mut file = &lock.file;
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut raw = String::new();
        file.read_to_string(&mut raw).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    #[cfg(unix)]
    fn test_lock_is_exclusive_and_released() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");

        let lock = RunLock::acquire(&data_dir, "cfn init").unwrap();
        assert!(data_dir.join(LOCK_FILENAME).exists());

        let meta = held(&lock);
        assert_eq!(meta.pid, std::process::id());
        assert_eq!(meta.command, "cfn init");

        let err = RunLock::acquire(&data_dir, "cfn init -c web").unwrap_err();
        match err {
            LockError::Contention { command, pid, .. } => {
                assert_eq!(command, "cfn init");
                assert_eq!(pid, std::process::id());
            }
            other => panic!("expected contention, got {other}"),
        }

        drop(lock);
        let again = RunLock::acquire(&data_dir, "cfn init --resume").unwrap();
        assert_eq!(held(&again).command, "cfn init --resume");
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILENAME);

        // A holder killed mid-run leaves its metadata in an unlocked file
        let dead = LockMetadata {
            pid: 4_000_000,
            started_at: Utc::now(),
            command: format!("cfn init -c {}", "web,".repeat(64)),
        };
        fs::write(&path, serde_json::to_string_pretty(&dead).unwrap()).unwrap();

        let lock = RunLock::acquire(temp.path(), "cfn init --resume").unwrap();
        let meta = held(&lock);
        assert_eq!(meta.pid, std::process::id());
        assert_eq!(meta.command, "cfn init --resume");
    }

    #[test]
    fn test_unreadable_lock_metadata() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILENAME);
        fs::write(&path, "garbage").unwrap();

        // Garbage in an unlocked file is simply overwritten
        let lock = RunLock::acquire(temp.path(), "cfn init").unwrap();
        assert_eq!(held(&lock).command, "cfn init");

        let err = contention(&temp.path().join("missing"));
        assert!(matches!(err, LockError::ContentionUnknown { .. }));
        assert!(err.to_string().contains("lock is released"));
    }
}
