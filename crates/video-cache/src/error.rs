//! Error types for the video cache

use persistent_blob_store::StoreError;
use std::fmt;

/// Why a URI cannot be turned into a cache key
///
/// These are expected outcomes the caller branches on, not failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    MissingExtension,
    UnsupportedExtension(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::MissingExtension => write!(f, "Missing file extension"),
            KeyError::UnsupportedExtension(ext) => {
                write!(f, "Unsupported file extension: {}", ext)
            }
        }
    }
}

impl std::error::Error for KeyError {}

#[derive(Debug)]
pub enum CacheError {
    Key(KeyError),
    Store(StoreError),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Key(err) => write!(f, "Cache key error: {}", err),
            CacheError::Store(err) => write!(f, "Persistent store error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Key(err) => Some(err),
            CacheError::Store(err) => Some(err),
        }
    }
}

impl From<KeyError> for CacheError {
    fn from(err: KeyError) -> Self {
        CacheError::Key(err)
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::Store(err)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
