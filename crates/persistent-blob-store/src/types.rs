//! Store types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Baseline garbage-collection interval in seconds
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 6 * 60 + 3;

/// A copy of a persisted record handed out to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<u8>,
    pub stored_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Statistics about the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: usize,
    pub total_size: u64,
    pub locked_size: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Outcome of one garbage-collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records removed because they outlived the expiration period
    pub expired: usize,
    /// Records removed to bring the store under its size constraint
    pub evicted: usize,
    /// Records that could not be deleted; retried on the next pass
    pub failed: usize,
    pub bytes_freed: u64,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// Configuration for a [`crate::PersistentStore`], fixed at construction
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory holding one record file per key
    pub path: PathBuf,
    /// Unlocked records older than this are reaped
    pub expiration: Duration,
    /// Soft upper bound on total payload bytes, enforced by each sweep
    pub size_constraint_bytes: u64,
    /// How often the garbage collector sweeps
    pub gc_interval: Duration,
    /// Shard records into `<first two key chars>/` subdirectories
    pub use_directory_separation: bool,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./cache/blobs"),
            expiration: Duration::from_secs(60 * 60 * 24 * 30), // 30 days
            size_constraint_bytes: 100 * 1024 * 1024,          // 100MB
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS * 3 / 2),
            use_directory_separation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_stats_default() {
        let stats = StoreStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.locked_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_default_options() {
        let options = StoreOptions::default();
        assert_eq!(options.expiration, Duration::from_secs(2_592_000));
        assert_eq!(options.size_constraint_bytes, 104_857_600);
        assert_eq!(options.gc_interval, Duration::from_secs(544));
        assert!(!options.use_directory_separation);
    }

    #[test]
    fn test_sweep_report_serialization() {
        let report = SweepReport {
            expired: 2,
            evicted: 3,
            failed: 0,
            bytes_freed: 4096,
        };
        assert_eq!(report.removed(), 5);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("4096"));

        let deserialized: SweepReport = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, report);
    }
}
