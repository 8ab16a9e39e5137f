//! The outward-facing durable graph store: serializes writers, publishes
//! read-consistent state to lock-free readers via a seqlock.

use std::cell::UnsafeCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::lockfile::{self, Lockfile};
use crate::pool::{EdgePool, EmbeddingPool, NodePool, N_EPROPS, N_PROPS};
use crate::snapshot::{self, PoolCapacities};
use crate::stats::{MemoryStats, Stats, WalStats};
use crate::wal::{CheckResult, Frame, SegmentedLog};

/// Base name of the active WAL file within a data directory.
pub const WAL_BASE: &str = "nendb.wal";

/// Pool capacities fixed at open time rather than at compile time, so a
/// single binary can serve directories with different arena sizes.
#[derive(Debug, Clone, Copy)]
pub struct EngineCapacities {
    /// Node arena capacity.
    pub nodes: usize,
    /// Edge arena capacity.
    pub edges: usize,
    /// Embedding arena capacity.
    pub embeddings: usize,
}

impl Default for EngineCapacities {
    fn default() -> Self {
        Self {
            nodes: 1 << 20,
            edges: 1 << 20,
            embeddings: 0,
        }
    }
}

struct Inner {
    nodes: NodePool,
    edges: EdgePool,
    embeddings: EmbeddingPool,
    wal: SegmentedLog,
    ops_since_snapshot: u64,
}

fn apply_frame(nodes: &mut NodePool, edges: &mut EdgePool, frame: Frame) -> Result<()> {
    match frame {
        Frame::NodeInsert { id, kind, props } => {
            nodes.insert_with_props(id, kind, props)?;
        }
        Frame::EdgeInsert {
            from,
            to,
            label,
            props,
        } => {
            edges.insert_with_props(from, to, label, props)?;
        }
    }
    Ok(())
}

/// A handle to an open graph store. Cheap to share across threads: readers
/// call [`GraphDb::lookup_node`] without blocking; writers serialize through
/// an internal mutex.
#[derive(Debug)]
pub struct GraphDb {
    dir: PathBuf,
    config: EngineConfig,
    read_only: bool,
    _lock: Option<Lockfile>,
    writer_mutex: Mutex<()>,
    read_seq: AtomicU64,
    inner: UnsafeCell<Inner>,
}

// SAFETY: all mutation of `inner` happens while holding `writer_mutex`, and
// every mutation is bracketed by a `read_seq` increment before and after.
// Readers only ever take immutable snapshots through the
// seqlock retry loop and never form a `&mut` reference, so concurrent
// reader/writer access to `inner` never produces a data race the Rust
// aliasing model would reject through a shared reference — the seqlock
// protocol is responsible for readers never observing a torn write.
unsafe impl Sync for GraphDb {}

/// `repair` gates every destructive recovery mutation (tail-scan truncation
/// on open, truncation at a bad replay boundary): `true` for a read-write
/// open, `false` for `open_readonly`, so a reader never mutates a directory
/// a writer might still hold.
fn recover(dir: &Path, config: &EngineConfig, caps: EngineCapacities, repair: bool) -> Result<Inner> {
    let pool_caps = PoolCapacities {
        nodes: caps.nodes,
        edges: caps.edges,
        embeddings: caps.embeddings,
    };
    let (mut nodes, mut edges, embeddings, last_lsn) = snapshot::restore(dir, pool_caps)?;
    let mut wal = SegmentedLog::open(dir, WAL_BASE, config, repair)?;
    wal.replay_from_lsn(last_lsn, repair, |frame| apply_frame(&mut nodes, &mut edges, frame))?;

    Ok(Inner {
        nodes,
        edges,
        embeddings,
        wal,
        ops_since_snapshot: 0,
    })
}

impl GraphDb {
    /// Opens (and recovers) a read-write handle on `dir`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] if another writer holds the lockfile,
    /// [`Error::Corrupt`] on unrecoverable WAL/header damage.
    #[instrument(skip(caps))]
    pub fn open(dir: &Path, caps: EngineCapacities) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let lock = Lockfile::acquire(dir)?;
        let config = EngineConfig::resolve(dir)?;
        let inner = recover(dir, &config, caps, true)?;
        info!(dir = %dir.display(), nodes = inner.nodes.stats().count, "opened graph store");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            read_only: false,
            _lock: Some(lock),
            writer_mutex: Mutex::new(()),
            read_seq: AtomicU64::new(0),
            inner: UnsafeCell::new(inner),
        })
    }

    /// Opens a read-only handle: no lockfile is acquired, recovery never
    /// mutates the directory (a torn tail is detected but left on disk), and
    /// every mutating method returns [`Error::AccessDenied`].
    pub fn open_readonly(dir: &Path, caps: EngineCapacities) -> Result<Self> {
        let config = EngineConfig::resolve(dir)?;
        let inner = recover(dir, &config, caps, false)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            read_only: true,
            _lock: None,
            writer_mutex: Mutex::new(()),
            read_seq: AtomicU64::new(0),
            inner: UnsafeCell::new(inner),
        })
    }

    fn inner(&self) -> &Inner {
        // SAFETY: see the `Sync` justification on `GraphDb`.
        unsafe { &*self.inner.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn inner_mut(&self) -> &mut Inner {
        // SAFETY: callers hold `writer_mutex` for the duration of any use.
        unsafe { &mut *self.inner.get() }
    }

    fn enter_write_section(&self) {
        self.read_seq.fetch_add(1, Ordering::AcqRel);
    }

    fn exit_write_section(&self) {
        self.read_seq.fetch_add(1, Ordering::AcqRel);
    }

    fn periodic_maintenance(&self, inner: &mut Inner) {
        inner.ops_since_snapshot += 1;
        if self.config.sync_interval > 0 && inner.ops_since_snapshot % self.config.sync_interval == 0
        {
            // Best-effort: a failure here is recorded in the WAL's own
            // io_error_count and surfaces on the next insert via `healthy()`.
            let _ = inner.wal.flush();
        }
        if inner.ops_since_snapshot >= self.config.snapshot_interval {
            let _ = inner.wal.delete_segments_keep_last(1);
            inner.ops_since_snapshot = 0;
        }
    }

    /// Inserts a node with zeroed properties and appends its WAL record.
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] on a read-only handle, [`Error::PoolExhausted`]
    /// or [`Error::DuplicateId`] from the node arena, [`Error::Io`] if the WAL
    /// is unhealthy or the append fails.
    pub fn insert_node(&self, id: u64, kind: u8) -> Result<()> {
        if self.read_only {
            return Err(Error::AccessDenied("insert_node"));
        }
        let _guard = self.writer_mutex.lock();
        let inner = self.inner_mut();
        if !inner.wal.healthy() {
            return Err(Error::io(self.dir.clone(), wal_unhealthy_io_error()));
        }

        self.enter_write_section();
        let result = (|| -> Result<()> {
            inner.nodes.insert(id, kind)?;
            inner.wal.append(&Frame::NodeInsert {
                id,
                kind,
                props: [0u8; N_PROPS],
            })?;
            Ok(())
        })();
        if result.is_ok() {
            self.periodic_maintenance(inner);
        }
        self.exit_write_section();
        result
    }

    /// Inserts an edge with zeroed properties and appends its WAL record.
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] on a read-only handle, [`Error::PoolExhausted`]
    /// from the edge arena, [`Error::Io`] if the WAL is unhealthy or the
    /// append fails.
    pub fn insert_edge(&self, from: u64, to: u64, label: u16) -> Result<()> {
        if self.read_only {
            return Err(Error::AccessDenied("insert_edge"));
        }
        let _guard = self.writer_mutex.lock();
        let inner = self.inner_mut();
        if !inner.wal.healthy() {
            return Err(Error::io(self.dir.clone(), wal_unhealthy_io_error()));
        }

        self.enter_write_section();
        let result = (|| -> Result<()> {
            inner.edges.insert(from, to, label)?;
            inner.wal.append(&Frame::EdgeInsert {
                from,
                to,
                label,
                props: [0u8; N_EPROPS],
            })?;
            Ok(())
        })();
        if result.is_ok() {
            self.periodic_maintenance(inner);
        }
        self.exit_write_section();
        result
    }

    /// Looks up a node's slot by id without blocking writers (seqlock read).
    #[must_use]
    pub fn lookup_node(&self, id: u64) -> Option<(u64, u8)> {
        loop {
            let seq_before = self.read_seq.load(Ordering::Acquire);
            if seq_before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let inner = self.inner();
            let result = inner.nodes.find_slot(id).and_then(|slot| inner.nodes.get(slot));
            let seq_after = self.read_seq.load(Ordering::Acquire);
            if seq_before == seq_after {
                return result;
            }
        }
    }

    /// Snapshot of pool occupancy and WAL health.
    #[must_use]
    pub fn get_stats(&self) -> Stats {
        let _guard = self.writer_mutex.lock();
        let inner = self.inner();
        let node_stats = inner.nodes.stats();
        let edge_stats = inner.edges.stats();
        let embedding_stats = inner.embeddings.stats();
        Stats {
            memory: MemoryStats {
                node_count: node_stats.count,
                node_capacity: node_stats.capacity,
                edge_count: edge_stats.count,
                edge_capacity: edge_stats.capacity,
                embedding_count: embedding_stats.count,
                embedding_capacity: embedding_stats.capacity,
            },
            wal: WalStats {
                entries_written: inner.wal.entries_written,
                entries_replayed: inner.wal.entries_replayed,
                bytes_written: inner.wal.bytes_written,
                truncations: inner.wal.truncations,
                segment_index: inner.wal.segment_index(),
                io_error_count: inner.wal.io_error_count,
                last_error: inner.wal.last_error.clone(),
            },
            wal_healthy: inner.wal.healthy(),
        }
    }

    /// Writes a new snapshot image and truncates the WAL.
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] on a read-only handle, [`Error::Io`] on
    /// failure to write, rename, or fsync.
    pub fn snapshot(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::AccessDenied("snapshot"));
        }
        let _guard = self.writer_mutex.lock();
        let inner = self.inner_mut();
        let last_lsn = inner.wal.next_lsn().saturating_sub(1);
        snapshot::write(&self.dir, last_lsn, &inner.nodes, &inner.edges, &inner.embeddings)?;
        inner.wal.truncate_to_header()?;
        inner.ops_since_snapshot = 0;
        Ok(())
    }

    /// Reloads pools and WAL state from disk, discarding in-memory state not
    /// yet durable.
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] on a read-only handle, propagated snapshot or
    /// WAL errors otherwise.
    pub fn restore(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::AccessDenied("restore"));
        }
        let _guard = self.writer_mutex.lock();
        let inner = self.inner_mut();
        let caps = EngineCapacities {
            nodes: inner.nodes.stats().capacity,
            edges: inner.edges.stats().capacity,
            embeddings: inner.embeddings.stats().capacity,
        };
        let fresh = recover(&self.dir, &self.config, caps, true)?;
        self.enter_write_section();
        *inner = fresh;
        self.exit_write_section();
        Ok(())
    }

    /// Validates the active WAL, optionally repairing a torn tail.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] on failure to read or (with `fix`) rewrite the file.
    pub fn check(&self, fix: bool) -> Result<CheckResult> {
        let _guard = self.writer_mutex.lock();
        self.inner_mut().wal.check(fix)
    }

    /// Deletes all but the last `keep_last` historical segments, returning
    /// the number removed.
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] on a read-only handle, [`Error::Io`] on
    /// deletion failure.
    pub fn compact(&self, keep_last: u32) -> Result<u32> {
        if self.read_only {
            return Err(Error::AccessDenied("compact"));
        }
        let _guard = self.writer_mutex.lock();
        self.inner_mut().wal.delete_segments_keep_last(keep_last)
    }

    /// Flushes the WAL and releases the lockfile, consuming this handle.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the final flush or lockfile removal fails.
    pub fn close(mut self) -> Result<()> {
        if !self.read_only {
            self.inner.get_mut().wal.flush()?;
        }
        if let Some(lock) = self._lock.take() {
            lock.release()?;
        }
        Ok(())
    }
}

fn wal_unhealthy_io_error() -> std::io::Error {
    std::io::Error::other("WAL is unhealthy after a prior I/O failure; restart to recover")
}

/// Removes a stale lockfile for `dir`. Does not verify the
/// original writer has actually exited.
///
/// # Errors
///
/// [`Error::NotLocked`] if no lockfile exists.
pub fn force_unlock(dir: &Path) -> Result<()> {
    lockfile::force_unlock(dir)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
