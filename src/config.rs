//! Configuration for EmberKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EmberError, Result};

/// Main configuration for an EmberKV engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── dump.ekv         (full snapshot)
    ///     └── writeback.log    (records written by the bio worker)
    pub data_dir: PathBuf,

    /// Sync strategy: how often to fsync the write-back log
    pub sync_strategy: SyncStrategy,

    /// Write a full snapshot on engine exit, after the bio queue drains
    pub dump_on_exit: bool,

    /// Fold a replayed write-back log into a fresh snapshot on open
    pub compact_on_open: bool,

    // -------------------------------------------------------------------------
    // Background I/O Configuration
    // -------------------------------------------------------------------------
    /// Backoff between write-back retries after an I/O failure (milliseconds)
    pub retry_interval_ms: u64,

    // -------------------------------------------------------------------------
    // Placement Configuration
    // -------------------------------------------------------------------------
    /// Number of placement buckets keys are hashed into
    pub bucket_count: u64,
}

/// Write-back log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every record (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced records (balanced durability/performance)
    EveryNRecords { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./emberkv_data"),
            sync_strategy: SyncStrategy::EveryNRecords { count: 64 },
            dump_on_exit: true,
            compact_on_open: true,
            retry_interval_ms: 100,
            bucket_count: 16,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 {
            return Err(EmberError::Config(
                "bucket_count must be at least 1".to_string(),
            ));
        }
        if let SyncStrategy::EveryNRecords { count: 0 } = self.sync_strategy {
            return Err(EmberError::Config(
                "EveryNRecords sync strategy needs a non-zero count".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry backoff as a Duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the write-back log sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable the snapshot written on exit
    pub fn dump_on_exit(mut self, enabled: bool) -> Self {
        self.config.dump_on_exit = enabled;
        self
    }

    /// Enable or disable log compaction on open
    pub fn compact_on_open(mut self, enabled: bool) -> Self {
        self.config.compact_on_open = enabled;
        self
    }

    /// Set the write-back retry backoff (in milliseconds)
    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.retry_interval_ms = ms;
        self
    }

    /// Set the number of placement buckets
    pub fn bucket_count(mut self, count: u64) -> Self {
        self.config.bucket_count = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
