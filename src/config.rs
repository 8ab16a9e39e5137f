//! Runtime-tunable knobs, layered via `figment`: compiled-in defaults, then
//! an optional `nendb.toml` in the data directory, then environment
//! variables (highest precedence).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Default fsync cadence, in entries appended since the last sync.
pub const DEFAULT_SYNC_EVERY: u32 = 100;

/// Default segment rotation threshold, in bytes (1 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024;

/// Minimum allowed segment size; smaller values are rejected as misconfiguration.
pub const MIN_SEGMENT_SIZE: u64 = 256;

/// Default number of writes between periodic WAL flushes.
pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

/// Default number of writes between compaction triggers.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 10_000;

/// Engine-wide configuration, resolved once at [`open`](crate::engine::GraphDb::open) time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// fsync cadence, in entries appended since the last sync.
    pub sync_every: u32,
    /// WAL rotation threshold, in bytes.
    pub segment_size_limit: u64,
    /// Writes between periodic `flush()` calls from [`crate::engine::GraphDb`].
    pub sync_interval: u64,
    /// Writes between compaction triggers.
    pub snapshot_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_every: DEFAULT_SYNC_EVERY,
            segment_size_limit: DEFAULT_SEGMENT_SIZE,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Resolves configuration for the data directory at `dir`: defaults,
    /// overlaid with `<dir>/nendb.toml` if present, overlaid with
    /// `NENDB_SYNC_EVERY`/`NENDB_SEGMENT_SIZE` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file is malformed or an environment
    /// variable cannot be parsed as its expected type.
    pub fn resolve(dir: &Path) -> crate::error::Result<Self> {
        let toml_path = dir.join("nendb.toml");
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if toml_path.exists() {
            figment = figment.merge(Toml::file(&toml_path));
        }
        figment = figment.merge(Env::prefixed("NENDB_").only(&["SYNC_EVERY", "SEGMENT_SIZE"]));

        let config: EngineConfig = figment
            .extract()
            .map_err(|e| crate::error::Error::Corrupt(format!("invalid configuration: {e}")))?;

        if config.segment_size_limit < MIN_SEGMENT_SIZE {
            return Err(crate::error::Error::Corrupt(format!(
                "segment_size_limit {} below minimum {}",
                config.segment_size_limit, MIN_SEGMENT_SIZE
            )));
        }

        Ok(config)
    }
}
