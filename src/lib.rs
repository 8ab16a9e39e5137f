//! # `nendb-core`
//!
//! Durable storage and recovery core for a static-memory embedded graph
//! database: fixed-capacity node/edge/embedding pools, a segmented
//! write-ahead log with crash-safe tail repair, atomic snapshots, and a
//! seqlock-guarded engine that serializes writers while letting readers run
//! lock-free.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use nendb_core::{EngineCapacities, GraphDb};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = GraphDb::open("./data".as_ref(), EngineCapacities::default())?;
//!
//!     db.insert_node(1, 0)?;
//!     db.insert_node(2, 0)?;
//!     db.insert_edge(1, 2, 0)?;
//!
//!     assert!(db.lookup_node(1).is_some());
//!     db.snapshot()?;
//!     db.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod engine;
pub mod error;
pub mod lockfile;
pub mod pool;
pub mod snapshot;
pub mod stats;
pub mod wal;

pub use config::EngineConfig;
pub use engine::{force_unlock, EngineCapacities, GraphDb};
pub use error::{Error, Result};
pub use pool::{EdgePool, EmbeddingPool, NodePool, EMBEDDING_DIM, N_EPROPS, N_PROPS};
pub use stats::{MemoryStats, Stats, WalStats};
pub use wal::{check_directory, CheckResult};
