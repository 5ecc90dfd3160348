//! Exclusive lock held for the duration of a run.
//!
//! Two overlapping runs would race on the same retention tag, so the backup
//! directory carries a lock file containing the owning PID. A lock whose PID
//! no longer names a live process is stale and is replaced. `--break-lock`
//! removes any existing lock unconditionally.

use crate::utils::{Result, SyncError};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = ".world-sync.lock";

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock in `dir`, failing if a live run holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);

        match Self::create(&path) {
            Err(SyncError::Locked(owner)) => {
                let Some(pid) = owner.trim().parse::<i32>().ok().filter(|pid| !process_alive(*pid)) else {
                    return Err(SyncError::Locked(format!(
                        "{} exists (pid {})",
                        path.display(),
                        owner.trim()
                    )));
                };
                warn!(
                    "Removing stale run lock {} left by pid {}",
                    path.display(),
                    pid
                );
                std::fs::remove_file(&path)?;
                Self::create(&path).map_err(|e| match e {
                    SyncError::Locked(owner) => SyncError::Locked(format!(
                        "{} exists (pid {})",
                        path.display(),
                        owner.trim()
                    )),
                    other => other,
                })
            }
            other => other,
        }
    }

    /// Take the lock in `dir`, removing any existing lock first.
    ///
    /// Use this only when the owning run is known to be gone.
    pub fn break_lock(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        match std::fs::remove_file(&path) {
            Ok(()) => warn!("Broke run lock {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Self::acquire(dir)
    }

    /// Create the lock file. `Locked` carries the current owner's contents.
    fn create(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = std::fs::read_to_string(path).unwrap_or_default();
                return Err(SyncError::Locked(owner));
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(file, "{}", std::process::id())?;
        debug!("Acquired run lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

/// Whether `pid` names a running process. Unknown answers count as alive.
#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return true;
    }
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}
