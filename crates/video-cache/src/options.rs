//! Cache configuration

use persistent_blob_store::{StoreOptions, DEFAULT_GC_INTERVAL_SECS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IDENTIFIER: &str = "rct.video.cache";

/// Configuration for a [`crate::VideoCache`], fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Parent of the persistent store directory
    pub root_directory: PathBuf,
    /// Parent of the ephemeral staging directory
    pub staging_directory: PathBuf,
    /// Subdirectory name used under both roots
    pub identifier: String,
    pub default_expiration_secs: u64,
    pub size_constraint_bytes: u64,
    pub gc_interval_secs: u64,
    pub use_directory_separation: bool,
}

impl CacheOptions {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Directory holding persistent records
    pub fn cache_path(&self) -> PathBuf {
        self.root_directory.join(&self.identifier)
    }

    /// Directory holding staged copies
    pub fn staging_path(&self) -> PathBuf {
        self.staging_directory.join(&self.identifier)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            path: self.cache_path(),
            expiration: Duration::from_secs(self.default_expiration_secs),
            size_constraint_bytes: self.size_constraint_bytes,
            gc_interval: Duration::from_secs(self.gc_interval_secs),
            use_directory_separation: self.use_directory_separation,
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            root_directory: dirs::cache_dir().unwrap_or_else(std::env::temp_dir),
            staging_directory: std::env::temp_dir(),
            identifier: DEFAULT_IDENTIFIER.to_string(),
            default_expiration_secs: 60 * 60 * 24 * 30, // 30 days
            size_constraint_bytes: 1024 * 1024 * 100,   // 100MB
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS * 3 / 2,
            use_directory_separation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CacheOptions::default();
        assert_eq!(options.identifier, "rct.video.cache");
        assert_eq!(options.default_expiration_secs, 2_592_000);
        assert_eq!(options.size_constraint_bytes, 104_857_600);
        assert_eq!(options.gc_interval_secs, 544);
        assert!(!options.use_directory_separation);
        assert_eq!(options.staging_directory, std::env::temp_dir());
    }

    #[test]
    fn test_paths_append_identifier() {
        let options = CacheOptions {
            root_directory: PathBuf::from("/var/cache"),
            staging_directory: PathBuf::from("/tmp"),
            ..CacheOptions::new("clips")
        };

        assert_eq!(options.cache_path(), PathBuf::from("/var/cache/clips"));
        assert_eq!(options.staging_path(), PathBuf::from("/tmp/clips"));
    }

    #[test]
    fn test_store_options_conversion() {
        let options = CacheOptions {
            root_directory: PathBuf::from("/var/cache"),
            default_expiration_secs: 60,
            size_constraint_bytes: 4096,
            gc_interval_secs: 90,
            use_directory_separation: true,
            ..CacheOptions::default()
        };

        let store = options.store_options();
        assert_eq!(store.path, PathBuf::from("/var/cache/rct.video.cache"));
        assert_eq!(store.expiration, Duration::from_secs(60));
        assert_eq!(store.size_constraint_bytes, 4096);
        assert_eq!(store.gc_interval, Duration::from_secs(90));
        assert!(store.use_directory_separation);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let json = r#"{ "identifier": "trailers", "size_constraint_bytes": 2048 }"#;
        let options: CacheOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.identifier, "trailers");
        assert_eq!(options.size_constraint_bytes, 2048);
        assert_eq!(options.default_expiration_secs, 2_592_000);
    }
}
