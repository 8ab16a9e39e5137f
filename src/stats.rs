//! Observability snapshots returned by [`crate::engine::GraphDb::get_stats`].

/// Pool occupancy at the moment of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Live node count.
    pub node_count: usize,
    /// Node arena capacity.
    pub node_capacity: usize,
    /// Live edge count.
    pub edge_count: usize,
    /// Edge arena capacity.
    pub edge_capacity: usize,
    /// Live embedding count.
    pub embedding_count: usize,
    /// Embedding arena capacity.
    pub embedding_capacity: usize,
}

/// WAL session counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalStats {
    /// Entries appended this session.
    pub entries_written: u64,
    /// Entries applied during recovery replay this session.
    pub entries_replayed: u64,
    /// Bytes appended this session.
    pub bytes_written: u64,
    /// Tail-scan or mid-replay truncations this session.
    pub truncations: u64,
    /// Highest completed historical segment index.
    pub segment_index: u32,
    /// I/O failures observed this session.
    pub io_error_count: u64,
    /// Most recent I/O error message, if any.
    pub last_error: Option<String>,
}

/// Combined engine health and occupancy snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Pool occupancy.
    pub memory: MemoryStats,
    /// WAL session counters.
    pub wal: WalStats,
    /// `true` if the WAL has observed no I/O failure this session.
    pub wal_healthy: bool,
}
