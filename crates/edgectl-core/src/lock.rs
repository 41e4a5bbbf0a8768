//! Advisory lock files
//!
//! A lock is a file holding the owner's pid, created with no-clobber
//! semantics. Locks left behind by a dead process are reclaimed.

use crate::error::FileError;
use crate::fs::AtomicFile;
use crate::process;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held lock; released when dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting at most `timeout`.
    pub fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, FileError> {
        let path = path.into();
        let file = AtomicFile::new(&path);
        let started = Instant::now();
        let owner = std::process::id();

        loop {
            if file.create_new(owner.to_string().as_bytes())? {
                debug!("Acquired lock {}", path.display());
                return Ok(Self { path });
            }

            if let Some(contents) = file.read_to_string()? {
                let holder = contents.trim().parse::<u32>().ok();
                let stale = match holder {
                    Some(pid) => pid != owner && !process::is_alive(pid),
                    None => true,
                };
                if stale {
                    warn!(
                        "Reclaiming stale lock {} (holder {:?} is gone)",
                        path.display(),
                        holder
                    );
                    reclaim(&path, &contents)?;
                    continue;
                }
            }

            if started.elapsed() >= timeout {
                return Err(FileError::LockTimeout {
                    path,
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Move the lock at `path` aside and discard it only if it still holds
/// `stale`. A lock another waiter took over in the meantime is put back.
fn reclaim(path: &Path, stale: &str) -> Result<bool, FileError> {
    let io = |e| FileError::io(path, e);
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".stale-{}", std::process::id()));
    let aside = PathBuf::from(aside);

    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(io(e)),
    }
    let taken = std::fs::read_to_string(&aside).map_err(io)?;
    if taken == stale {
        std::fs::remove_file(&aside).map_err(io)?;
        return Ok(true);
    }

    debug!("Lock {} changed hands before reclaim, restoring", path.display());
    let restored = std::fs::hard_link(&aside, path);
    std::fs::remove_file(&aside).map_err(io)?;
    match restored {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            warn!(
                "Lock {} was re-created while restoring holder {}",
                path.display(),
                taken.trim()
            );
            Ok(false)
        }
        Err(e) => Err(io(e)),
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}
