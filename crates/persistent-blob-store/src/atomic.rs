//! Atomic file publication
//!
//! Bytes are written to a hidden temporary file in the destination directory
//! and renamed over the target, so readers see either the old complete file
//! or the new complete file.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Prefix of in-flight temporary files; scans skip names starting with `.`
const TEMP_PREFIX: &str = ".tmp";

/// Write `data` to `path` atomically on the blocking pool
pub async fn write_atomic(path: PathBuf, data: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &data))
        .await
        .map_err(io::Error::other)?
}

/// Blocking half of [`write_atomic`]
fn write_atomic_blocking(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map(|_| ()).map_err(|e| e.error)
}

/// Whether a directory entry name is an in-flight temporary file
pub fn is_temporary(name: &str) -> bool {
    name.starts_with('.')
}
