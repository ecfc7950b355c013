//! Durable size-bounded blob store with TTL expiration and garbage collection
//!
//! Stores one record file per key with a checksummed header, keeps an
//! in-memory index of record metadata, and sweeps expired or over-budget
//! records on a background interval. Locked records are never swept.

mod atomic;
mod error;
mod gc;
mod record;
mod store;
mod types;

pub use atomic::{is_temporary, write_atomic};
pub use error::{Result, StoreError};
pub use gc::{GarbageCollector, GcHandle};
pub use store::PersistentStore;
pub use types::{CacheEntry, StoreOptions, StoreStats, SweepReport, DEFAULT_GC_INTERVAL_SECS};
