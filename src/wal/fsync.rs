//! Fsync discipline: a "strong" file fsync that crosses
//! write caches where the platform exposes a full-sync primitive, and a
//! directory fsync required after every rename-based atomic commit
//! (segment rotation, snapshot publish).

use std::fs::File;
use std::io;
use std::path::Path;

/// Durable flush that crosses the disk write cache where the OS provides a
/// full-sync primitive (macOS `F_FULLFSYNC`); falls back to `File::sync_all`
/// everywhere else.
pub fn strong_fsync_file(file: &File) -> io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: `file` is a valid, open file descriptor for the duration of
        // this call; `F_FULLFSYNC` takes no arguments beyond the fd.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if rc == -1 {
            // F_FULLFSYNC can fail on filesystems that don't support it
            // (e.g. some network mounts); fall back to the ordinary sync.
            return file.sync_all();
        }
        Ok(())
    }
    #[cfg(not(target_os = "macos"))]
    {
        file.sync_all()
    }
}

/// Fsyncs the directory at `path` so a preceding rename is durably visible.
/// Rename-based atomicity is not guaranteed across power loss without this.
///
/// No-op on platforms (Windows) where directories cannot be opened as files.
pub fn fsync_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)?;
        dir.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
