//! Fetch outcomes and asset handles

use crate::error::KeyError;
use std::io;
use std::path::{Path, PathBuf};

/// A locally available copy of a cached asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetHandle {
    /// A file in the staging directory, valid until the temp dir is cleaned
    Staged(PathBuf),
    /// Bytes served straight from the persistent store when staging failed
    Inline(Vec<u8>),
}

impl AssetHandle {
    pub fn path(&self) -> Option<&Path> {
        match self {
            AssetHandle::Staged(path) => Some(path),
            AssetHandle::Inline(_) => None,
        }
    }

    pub fn is_staged(&self) -> bool {
        matches!(self, AssetHandle::Staged(_))
    }

    /// Read the asset's bytes
    pub async fn read(&self) -> io::Result<Vec<u8>> {
        match self {
            AssetHandle::Staged(path) => tokio::fs::read(path).await,
            AssetHandle::Inline(data) => Ok(data.clone()),
        }
    }
}

/// Result of looking up a URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Available(AssetHandle),
    /// Cacheable but not cached; fetch from the network and `store` it
    NotAvailable,
    MissingExtension,
    UnsupportedExtension,
}

impl FetchOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, FetchOutcome::Available(_))
    }

    pub fn into_handle(self) -> Option<AssetHandle> {
        match self {
            FetchOutcome::Available(handle) => Some(handle),
            _ => None,
        }
    }
}

impl From<KeyError> for FetchOutcome {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::MissingExtension => FetchOutcome::MissingExtension,
            KeyError::UnsupportedExtension(_) => FetchOutcome::UnsupportedExtension,
        }
    }
}
