//! Configuration for the operation log
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{LogError, Result};

/// Main configuration for a log instance
#[derive(Debug, Clone)]
pub struct LogConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all logs
    /// Internal structure:
    ///   {data_dir}/
    ///     └── wals/
    ///         └── {tablet_id}/
    ///             ├── wal-000000001   (sealed segment)
    ///             ├── wal-000000002   (active segment)
    ///             └── index.bin       (optional side index)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Writer Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    /// Segment size (in bytes) after which the writer rolls over
    pub max_segment_size: u64,

    // -------------------------------------------------------------------------
    // Reader Configuration
    // -------------------------------------------------------------------------
    /// Frames declaring a larger payload are treated as corrupt
    pub max_entry_size: u64,

    // -------------------------------------------------------------------------
    // Decoder Configuration
    // -------------------------------------------------------------------------
    /// Initial arena capacity for one decode batch (in bytes)
    pub arena_initial_bytes: usize,

    /// Hard cap on arena growth for one decode batch (in bytes)
    pub arena_max_bytes: usize,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N appended entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./oplog_data"),
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            max_entry_size: 16 * 1024 * 1024,   // 16 MB
            arena_initial_bytes: 32 * 1024,     // 32 KB
            arena_max_bytes: 1024 * 1024,       // 1 MB
        }
    }
}

impl LogConfig {
    /// Directory holding all logs
    pub const WALS_DIR: &'static str = "wals";

    /// Create a new config builder
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// Directory of the log belonging to one tablet
    pub fn log_dir(&self, tablet_id: &str) -> PathBuf {
        self.data_dir.join(Self::WALS_DIR).join(tablet_id)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.max_segment_size == 0 {
            return Err(LogError::Config("max_segment_size must be > 0".to_string()));
        }
        if self.max_entry_size == 0 {
            return Err(LogError::Config("max_entry_size must be > 0".to_string()));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(LogError::Config(
                "EveryNEntries sync count must be > 0".to_string(),
            ));
        }
        if self.arena_initial_bytes == 0 || self.arena_initial_bytes > self.arena_max_bytes {
            return Err(LogError::Config(format!(
                "arena sizes must satisfy 0 < initial ({}) <= max ({})",
                self.arena_initial_bytes, self.arena_max_bytes
            )));
        }
        Ok(())
    }
}

/// Builder for LogConfig
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    /// Set the data directory (root for all logs)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the segment size limit (in bytes)
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    /// Set the largest frame the reader will accept (in bytes)
    pub fn max_entry_size(mut self, size: u64) -> Self {
        self.config.max_entry_size = size;
        self
    }

    /// Set the decoder arena sizing (in bytes)
    pub fn arena_bytes(mut self, initial: usize, max: usize) -> Self {
        self.config.arena_initial_bytes = initial;
        self.config.arena_max_bytes = max;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}
