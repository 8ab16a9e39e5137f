//! Single-writer lockfile: exclusive-create sentinel file,
//! no PID-based stealing, explicit `force_unlock`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

/// A held writer lock for a data directory. Dropping without calling
/// [`Lockfile::release`] leaves the sentinel file behind — by design, so a
/// crashed writer's lock survives until [`force_unlock`] or a clean close.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
    released: bool,
}

fn lock_path(dir: &Path) -> PathBuf {
    dir.join("nendb.wal.lock")
}

impl Lockfile {
    /// Exclusively creates `<dir>/nendb.wal.lock`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] if the sentinel already exists.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = lock_path(dir);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::AlreadyLocked
                } else {
                    Error::io(&path, e)
                }
            })?;
        let _ = writeln!(file, "pid={}", std::process::id());
        Ok(Self {
            path,
            released: false,
        })
    }

    /// Deletes the sentinel file, marking this lock released.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file cannot be removed.
    pub fn release(mut self) -> Result<()> {
        std::fs::remove_file(&self.path).map_err(|e| Error::io(&self.path, e))?;
        self.released = true;
        Ok(())
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        if !self.released {
            warn!(path = %self.path.display(), "lockfile dropped without a clean release");
        }
    }
}

/// Removes a stale lockfile left behind by a crashed writer. Does not verify
/// that the original holder is actually gone — no PID-based stealing is
/// performed; this is an explicit, caller-initiated override.
///
/// # Errors
///
/// [`Error::NotLocked`] if no lockfile exists at `dir`.
pub fn force_unlock(dir: &Path) -> Result<()> {
    let path = lock_path(dir);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotLocked),
        Err(e) => Err(Error::io(&path, e)),
    }
}

#[cfg(test)]
#[path = "lockfile_tests.rs"]
mod tests;
