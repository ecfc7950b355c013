//! Cache key derivation from media URIs

use crate::error::KeyError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Extensions eligible for caching
///
/// HLS playlists (`m3u8`) are intentionally absent: a playlist is not a
/// self-contained asset.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["m4v", "mp4", "mov"];

/// Stable key addressing both the staging and persistent stores
///
/// Rendered as 32 uppercase hex digits, a dot, and the URI's extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn extension(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the cache key for a media URI
///
/// Everything from the first `?` on is ignored, so signed URLs that differ
/// only in their query string share one entry.
pub fn derive_key(uri: &str) -> Result<CacheKey, KeyError> {
    let path = uri.split_once('?').map_or(uri, |(path, _)| path);

    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .ok_or(KeyError::MissingExtension)?;

    if !SUPPORTED_EXTENSIONS.contains(&extension) {
        return Err(KeyError::UnsupportedExtension(extension.to_string()));
    }

    Ok(CacheKey(format!("{}.{}", digest128(path), extension)))
}

/// First 128 bits of SHA-256, as uppercase hex
fn digest128(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode_upper(&digest[..16])
}
