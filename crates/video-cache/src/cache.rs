//! Two-tier cache facade: staging directory in front of the persistent store

use crate::error::Result;
use crate::key::derive_key;
use crate::options::CacheOptions;
use crate::staging::StagingStore;
use crate::types::{AssetHandle, FetchOutcome};
use persistent_blob_store::{GarbageCollector, GcHandle, PersistentStore, StoreStats};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Video asset cache
///
/// Construct once at startup and share by reference (e.g. `Arc<VideoCache>`).
/// Lookups go staging, then persistent store, then report a miss; the caller
/// fetches misses from the network and hands the bytes back via [`store`].
///
/// [`store`]: VideoCache::store
pub struct VideoCache {
    options: CacheOptions,
    staging: StagingStore,
    persistent: Arc<PersistentStore>,
    /// Serializes staging writes against persistent reads and writes, so a
    /// fetch can never stage bytes older than a concurrent store
    publish: AsyncMutex<()>,
    gc: Mutex<Option<GcHandle>>,
}

impl VideoCache {
    /// Open both stores and start garbage collection on the current runtime
    pub async fn open(options: CacheOptions) -> Result<Self> {
        let persistent = Arc::new(PersistentStore::open(options.store_options()).await?);
        let staging = StagingStore::new(options.staging_path()).await;
        let gc = GarbageCollector::new(persistent.clone()).spawn();

        info!(
            cache_dir = ?options.cache_path(),
            staging_dir = ?options.staging_path(),
            max_size_mb = options.size_constraint_bytes / (1024 * 1024),
            expiration_secs = options.default_expiration_secs,
            "Video cache initialized"
        );

        Ok(Self {
            options,
            staging,
            persistent,
            publish: AsyncMutex::new(()),
            gc: Mutex::new(Some(gc)),
        })
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn persistent(&self) -> &PersistentStore {
        &self.persistent
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Look up a cached asset for `uri`
    ///
    /// Store failures are logged and reported as [`FetchOutcome::NotAvailable`]
    /// since re-fetching from the network is always safe.
    pub async fn fetch(&self, uri: &str) -> FetchOutcome {
        let key = match derive_key(uri) {
            Ok(key) => key,
            Err(e) => {
                debug!(uri = %uri, reason = %e, "URI not cacheable");
                return e.into();
            }
        };

        if let Some(path) = self.staging.get(&key).await {
            debug!(key = %key, "Staging hit");
            return FetchOutcome::Available(AssetHandle::Staged(path));
        }

        let _publish = self.publish.lock().await;

        // A store may have staged the asset while we waited
        if let Some(path) = self.staging.get(&key).await {
            debug!(key = %key, "Staging hit");
            return FetchOutcome::Available(AssetHandle::Staged(path));
        }

        let data = match self.persistent.load(key.as_str()).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                return FetchOutcome::NotAvailable;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent store read failed, treating as miss");
                return FetchOutcome::NotAvailable;
            }
        };

        match self.staging.put(&key, &data).await {
            Ok(path) => FetchOutcome::Available(AssetHandle::Staged(path)),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to stage asset, serving persistent copy");
                FetchOutcome::Available(AssetHandle::Inline(data))
            }
        }
    }

    /// Cache freshly fetched bytes for `uri`
    ///
    /// The persistent write is authoritative and its failure is returned.
    /// Staging is refreshed afterwards on a best-effort basis; a stale staged
    /// copy is dropped if it cannot be replaced.
    pub async fn store(&self, uri: &str, data: &[u8]) -> Result<()> {
        let key = derive_key(uri)?;
        let _publish = self.publish.lock().await;

        self.persistent.store(key.as_str(), data, false).await?;

        let staged = if data.is_empty() {
            self.staging.remove(&key).await.map(|_| ())
        } else {
            self.staging.put(&key, data).await.map(|_| ())
        };

        if let Err(e) = staged {
            warn!(key = %key, error = %e, "Failed to stage asset");
            if let Err(e) = self.staging.remove(&key).await {
                warn!(key = %key, error = %e, "Failed to drop stale staged copy");
            }
        }

        debug!(key = %key, size = data.len(), "Cached asset");
        Ok(())
    }

    /// Remove every staged copy; the persistent store is untouched
    pub async fn clear_staging(&self) -> io::Result<usize> {
        self.staging.clear().await
    }

    pub async fn stats(&self) -> StoreStats {
        self.persistent.stats().await
    }

    /// Stop the garbage collector, letting an in-flight sweep finish
    pub async fn shutdown(&self) {
        let handle = self
            .gc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("Video cache shut down");
        }
    }
}

impl Drop for VideoCache {
    fn drop(&mut self) {
        let gc = self.gc.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = gc.as_ref() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, KeyError};
    use std::path::Path;
    use tempfile::tempdir;

    const URI: &str = "https://cdn.example.com/videos/intro.mp4?token=abc";

    fn test_options(dir: &Path) -> CacheOptions {
        CacheOptions {
            root_directory: dir.join("caches"),
            staging_directory: dir.join("tmp"),
            ..CacheOptions::default()
        }
    }

    fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("video_cache=debug,persistent_blob_store=debug")
            .with_test_writer()
            .try_init();
    }

    async fn open(dir: &Path) -> VideoCache {
        init_test_logging();
        VideoCache::open(test_options(dir)).await.unwrap()
    }

    #[tokio::test]
    async fn test_store_then_fetch() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.store(URI, b"video bytes").await.unwrap();

        let handle = cache.fetch(URI).await.into_handle().unwrap();
        assert!(handle.is_staged());
        assert_eq!(handle.read().await.unwrap(), b"video bytes");

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_miss() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        assert_eq!(cache.fetch(URI).await, FetchOutcome::NotAvailable);
    }

    #[tokio::test]
    async fn test_fetch_uncacheable_uris() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        assert_eq!(
            cache.fetch("https://host/a/video").await,
            FetchOutcome::MissingExtension
        );
        assert_eq!(
            cache.fetch("https://host/a/video.m3u8").await,
            FetchOutcome::UnsupportedExtension
        );
    }

    #[tokio::test]
    async fn test_store_rejects_uncacheable_uri() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        let err = cache
            .store("https://host/a/video.m3u8", b"#EXTM3U")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Key(KeyError::UnsupportedExtension(_))
        ));
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_staging_hit_skips_persistent_store() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.store(URI, b"clip").await.unwrap();
        assert!(cache.fetch(URI).await.is_available());
        assert!(cache.fetch(URI).await.is_available());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_persistent_hit_populates_staging() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.store(URI, b"clip").await.unwrap();
        assert_eq!(cache.clear_staging().await.unwrap(), 1);

        let handle = cache.fetch(URI).await.into_handle().unwrap();
        assert!(handle.is_staged());
        assert_eq!(handle.read().await.unwrap(), b"clip");
        assert_eq!(cache.stats().await.hits, 1);

        // Now served from staging
        assert!(cache.fetch(URI).await.is_available());
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_query_variants_share_an_entry() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.store(URI, b"clip").await.unwrap();

        let other = "https://cdn.example.com/videos/intro.mp4?token=rotated";
        let handle = cache.fetch(other).await.into_handle().unwrap();
        assert_eq!(handle.read().await.unwrap(), b"clip");
    }

    #[tokio::test]
    async fn test_store_twice_keeps_latest() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.store(URI, b"first").await.unwrap();
        cache.store(URI, b"second").await.unwrap();

        let handle = cache.fetch(URI).await.into_handle().unwrap();
        assert_eq!(handle.read().await.unwrap(), b"second");
        assert_eq!(cache.stats().await.entries, 1);

        cache.clear_staging().await.unwrap();
        let key = derive_key(URI).unwrap();
        assert_eq!(
            cache.persistent().load(key.as_str()).await.unwrap().unwrap(),
            b"second"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetch_never_stages_stale_bytes() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(open(dir.path()).await);

        for round in 0..100u32 {
            let old = format!("old {round}").into_bytes();
            let new = format!("new {round}").into_bytes();

            cache.store(URI, &old).await.unwrap();
            cache.clear_staging().await.unwrap();

            let fetcher = {
                let cache = cache.clone();
                tokio::spawn(async move { cache.fetch(URI).await })
            };
            let storer = {
                let cache = cache.clone();
                let new = new.clone();
                tokio::spawn(async move { cache.store(URI, &new).await })
            };
            fetcher.await.unwrap();
            storer.await.unwrap().unwrap();

            let handle = cache.fetch(URI).await.into_handle().unwrap();
            assert_eq!(handle.read().await.unwrap(), new);
        }

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let cache = open(dir.path()).await;
            cache.store(URI, b"durable").await.unwrap();
            cache.clear_staging().await.unwrap();
            cache.shutdown().await;
        }

        let cache = open(dir.path()).await;
        let handle = cache.fetch(URI).await.into_handle().unwrap();
        assert_eq!(handle.read().await.unwrap(), b"durable");
    }

    #[tokio::test]
    async fn test_degraded_staging_serves_persistent_bytes() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let options = CacheOptions {
            staging_directory: blocker,
            ..test_options(dir.path())
        };
        let cache = VideoCache::open(options).await.unwrap();
        assert!(!cache.staging().is_available());

        cache.store(URI, b"still cached").await.unwrap();

        let handle = cache.fetch(URI).await.into_handle().unwrap();
        assert_eq!(handle, AssetHandle::Inline(b"still cached".to_vec()));
    }

    #[tokio::test]
    async fn test_corrupt_persistent_record_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.store(URI, b"clip").await.unwrap();
        cache.clear_staging().await.unwrap();

        let key = derive_key(URI).unwrap();
        let record = cache.options().cache_path().join(key.as_str());
        std::fs::write(&record, b"garbage").unwrap();

        assert_eq!(cache.fetch(URI).await, FetchOutcome::NotAvailable);
    }

    #[tokio::test]
    async fn test_storing_empty_bytes_evicts() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.store(URI, b"clip").await.unwrap();
        cache.store(URI, b"").await.unwrap();

        assert_eq!(cache.fetch(URI).await, FetchOutcome::NotAvailable);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path()).await;

        cache.shutdown().await;
        cache.shutdown().await;
    }
}
