//! On-disk cache for remotely streamed video assets
//!
//! URIs are mapped to stable keys, looked up first in an ephemeral staging
//! directory and then in a durable, size-bounded persistent store. Misses are
//! reported back so the caller can fetch from the network and `store` the
//! result.

mod cache;
mod error;
mod key;
mod options;
mod staging;
mod types;

pub use cache::VideoCache;
pub use error::{CacheError, KeyError, Result};
pub use key::{derive_key, CacheKey, SUPPORTED_EXTENSIONS};
pub use options::{CacheOptions, DEFAULT_IDENTIFIER};
pub use staging::StagingStore;
pub use types::{AssetHandle, FetchOutcome};

pub use persistent_blob_store::{StoreError, StoreStats};
