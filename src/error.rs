//! Error taxonomy for the storage and recovery core.
//!
//! Every fallible operation returns [`Result<T>`]. I/O and pool errors are
//! always surfaced to the caller; CRC mismatches encountered during replay
//! are recovered locally (truncate and stop, see [`crate::wal::segment`])
//! and never escape as an `Err`.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the storage and recovery core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An underlying file operation failed. The engine records this in
    /// `io_error_count`/`last_error` and rejects further writes until restart.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        /// Path involved in the failing operation, when known.
        path: Option<PathBuf>,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Header magic/version mismatch, snapshot CRC mismatch with no valid
    /// `.bak`, or WAL damage that tail-scan truncation cannot resolve.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// A lockfile already exists for this data directory.
    #[error("data directory is already locked by another writer")]
    AlreadyLocked,

    /// A writer attempted `force_unlock` on a directory with no lockfile.
    #[error("data directory is not locked")]
    NotLocked,

    /// No free slot in the requested arena.
    #[error("pool exhausted: {0} at capacity {1}")]
    PoolExhausted(&'static str, usize),

    /// Node id already present in the pool's id index.
    #[error("duplicate node id {0}")]
    DuplicateId(u64),

    /// A mutation was attempted against a read-only handle or after a prior
    /// I/O failure poisoned the writer.
    #[error("access denied: {0}")]
    AccessDenied(&'static str),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: Some(path.into()),
            source,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { path: None, source }
    }
}
