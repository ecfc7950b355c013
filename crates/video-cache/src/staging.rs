//! Ephemeral staging directory of locally materialized assets

use crate::key::CacheKey;
use persistent_blob_store::{is_temporary, write_atomic};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

/// A read-through front for the persistent store, one file per key
///
/// Staged files are published by rename, so `get` never observes a torn
/// write. Nothing here is authoritative: losing the directory only costs a
/// re-copy from the persistent store.
pub struct StagingStore {
    root: PathBuf,
    available: AtomicBool,
}

impl StagingStore {
    /// Create the staging store, logging rather than failing if its directory
    /// cannot be created
    ///
    /// Temporary files left behind by an interrupted publish are removed.
    pub async fn new(root: PathBuf) -> Self {
        let available = match fs::create_dir_all(&root).await {
            Ok(()) => {
                if let Err(e) = remove_temporaries(&root).await {
                    warn!(staging_dir = ?root, error = %e, "Failed to remove stale temporary files");
                }
                info!(staging_dir = ?root, "Staging directory ready");
                true
            }
            Err(e) => {
                warn!(
                    staging_dir = ?root,
                    error = %e,
                    "Staging directory unavailable, serving from persistent store only"
                );
                false
            }
        };

        Self {
            root,
            available: AtomicBool::new(available),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the staging directory could be created
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Path of the staged copy for `key`, if one exists
    pub async fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.path_for(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// Atomically stage `data` for `key`, replacing any existing copy
    ///
    /// Recreates the staging directory once if it has been cleaned away.
    pub async fn put(&self, key: &CacheKey, data: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_for(key);

        match write_atomic(path.clone(), data.to_vec()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.root).await?;
                self.available.store(true, Ordering::Relaxed);
                write_atomic(path.clone(), data.to_vec()).await?;
            }
            Err(e) => return Err(e),
        }

        debug!(key = %key, size = data.len(), "Staged asset");
        Ok(path)
    }

    /// Drop the staged copy for `key`
    pub async fn remove(&self, key: &CacheKey) -> io::Result<bool> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove every staged file, returning how many staged assets were dropped
    ///
    /// Temporary files are removed too but not counted.
    pub async fn clear(&self) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
            if !is_temporary(&entry.file_name().to_string_lossy()) {
                removed += 1;
            }
        }

        debug!(removed, "Cleared staging directory");
        Ok(removed)
    }
}

/// Delete in-flight publish files that outlived their writer
async fn remove_temporaries(root: &Path) -> io::Result<()> {
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if is_temporary(&name.to_string_lossy()) && entry.file_type().await?.is_file() {
            debug!(path = ?entry.path(), "Removing stale temporary file");
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}
