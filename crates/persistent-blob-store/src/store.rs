//! Durable blob store with an in-memory record index

use crate::atomic::{is_temporary, write_atomic};
use crate::error::{Result, StoreError};
use crate::record::{self, RecordHeader, HEADER_LEN};
use crate::types::{CacheEntry, StoreOptions, StoreStats, SweepReport};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Index metadata for one persisted record
#[derive(Debug, Clone)]
struct RecordMeta {
    path: PathBuf,
    size: u64,
    stored_at: DateTime<Utc>,
    locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepReason {
    Expired,
    OverBudget,
}

#[derive(Debug, Clone)]
struct Victim {
    key: String,
    stored_at: DateTime<Utc>,
    reason: SweepReason,
}

type Index = HashMap<String, RecordMeta>;

/// A size-bounded key/blob store with one file per record
///
/// All file access happens while holding the index lock, so `load`, `store`
/// and sweep deletions on the same key never interleave.
pub struct PersistentStore {
    options: StoreOptions,
    /// Record metadata keyed by record key; also the global store lock
    index: Mutex<Index>,
    /// Load hit counter
    hits: AtomicU64,
    /// Load miss counter
    misses: AtomicU64,
}

impl PersistentStore {
    /// Open the store, creating its directory and rebuilding the index from disk
    pub async fn open(options: StoreOptions) -> Result<Self> {
        fs::create_dir_all(&options.path).await?;

        let store = Self {
            options,
            index: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        let index = store.scan().await?;
        let total_size: u64 = index.values().map(|m| m.size).sum();
        info!(
            path = ?store.options.path,
            entries = index.len(),
            total_size,
            "Persistent store opened"
        );
        *store.index.lock().await = index;

        Ok(store)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Load the payload stored under `key`
    pub async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.load_entry(key).await?.map(|entry| entry.data))
    }

    /// Load a copy of the full record stored under `key`
    ///
    /// Expired unlocked records and empty payloads are reaped and reported as
    /// misses. A corrupt record is reaped and returned as [`StoreError::Corrupt`].
    pub async fn load_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        validate_key(key)?;
        let mut index = self.index.lock().await;

        let Some(meta) = index.get(key).cloned() else {
            self.record_miss(key);
            return Ok(None);
        };

        if !meta.locked && self.is_expired(&meta, Utc::now()) {
            debug!(key = %key, stored_at = %meta.stored_at, "Record expired");
            reap(&mut index, key).await;
            self.record_miss(key);
            return Ok(None);
        }

        let mut bytes = match fs::read(&meta.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key = %key, "Record file vanished, dropping index entry");
                index.remove(key);
                self.record_miss(key);
                return Ok(None);
            }
            Err(e) => {
                self.record_miss(key);
                return Err(e.into());
            }
        };

        let header = match record::decode(&bytes) {
            Ok((header, _)) => header,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt record, removing");
                reap(&mut index, key).await;
                self.record_miss(key);
                return Err(e);
            }
        };

        if header.payload_len == 0 {
            debug!(key = %key, "Empty record treated as a miss");
            reap(&mut index, key).await;
            self.record_miss(key);
            return Ok(None);
        }

        bytes.drain(..HEADER_LEN);
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, size = bytes.len(), "Store hit");

        Ok(Some(CacheEntry {
            key: key.to_string(),
            size_bytes: header.payload_len,
            stored_at: header.stored_at,
            data: bytes,
        }))
    }

    /// Durably persist `data` under `key`, replacing any previous record
    ///
    /// `locked` records are exempt from expiration and size eviction. Storing
    /// an empty payload removes the key.
    pub async fn store(&self, key: &str, data: &[u8], locked: bool) -> Result<()> {
        self.put_record(key, data, locked, Utc::now()).await
    }

    async fn put_record(
        &self,
        key: &str,
        data: &[u8],
        locked: bool,
        stored_at: DateTime<Utc>,
    ) -> Result<()> {
        validate_key(key)?;

        if data.is_empty() {
            let mut index = self.index.lock().await;
            discard(&mut index, key).await?;
            debug!(key = %key, "Empty payload stored, record removed");
            return Ok(());
        }

        let path = self.record_path(key);
        let header = RecordHeader::for_payload(data, locked, stored_at);
        let bytes = record::encode(&header, data);

        let mut index = self.index.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(path.clone(), bytes).await?;

        let meta = RecordMeta {
            path: path.clone(),
            size: data.len() as u64,
            stored_at,
            locked,
        };
        if let Some(previous) = index.insert(key.to_string(), meta) {
            if previous.path != path {
                if let Err(e) = fs::remove_file(&previous.path).await {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(
                            key = %key,
                            path = ?previous.path,
                            error = %e,
                            "Failed to remove record from previous layout"
                        );
                    }
                }
            }
        }

        debug!(key = %key, size = data.len(), locked, "Stored record");
        Ok(())
    }

    /// Refresh the timestamp of a record, restarting its expiration window
    pub async fn touch(&self, key: &str) -> Result<()> {
        let now = Utc::now();
        self.rewrite_header(key, |header| header.stored_at = now)
            .await
    }

    /// Protect a record from expiration and size eviction
    pub async fn lock(&self, key: &str) -> Result<()> {
        self.rewrite_header(key, |header| header.locked = true).await
    }

    /// Return a record to the default eviction policy
    pub async fn unlock(&self, key: &str) -> Result<()> {
        self.rewrite_header(key, |header| header.locked = false).await
    }

    async fn rewrite_header<F>(&self, key: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut RecordHeader),
    {
        validate_key(key)?;
        let mut index = self.index.lock().await;

        let meta = index
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let bytes = match fs::read(&meta.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                index.remove(key);
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut header = match record::decode(&bytes) {
            Ok((header, _)) => header,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt record, removing");
                reap(&mut index, key).await;
                return Err(e);
            }
        };
        update(&mut header);

        let mut rewritten = bytes;
        rewritten[..HEADER_LEN].copy_from_slice(&header.encode());
        write_atomic(meta.path.clone(), rewritten).await?;

        index.insert(
            key.to_string(),
            RecordMeta {
                stored_at: header.stored_at,
                locked: header.locked,
                ..meta
            },
        );
        debug!(key = %key, locked = header.locked, "Record header updated");
        Ok(())
    }

    /// Delete a record regardless of its lock state
    pub async fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut index = self.index.lock().await;
        Ok(discard(&mut index, key).await?.is_some())
    }

    /// Delete every unlocked record
    pub async fn prune(&self) -> Result<usize> {
        self.remove_where(|meta| !meta.locked).await
    }

    /// Delete every locked record
    pub async fn wipe_locked(&self) -> Result<usize> {
        self.remove_where(|meta| meta.locked).await
    }

    async fn remove_where<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&RecordMeta) -> bool,
    {
        let mut index = self.index.lock().await;
        let keys: Vec<String> = index
            .iter()
            .filter(|(_, meta)| predicate(meta))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if discard(&mut index, &key).await?.is_some() {
                removed += 1;
            }
        }

        info!(removed, "Removed records");
        Ok(removed)
    }

    /// Total payload bytes currently tracked
    pub async fn total_size(&self) -> u64 {
        self.index.lock().await.values().map(|m| m.size).sum()
    }

    /// Payload bytes held by locked records
    pub async fn locked_size(&self) -> u64 {
        self.index
            .lock()
            .await
            .values()
            .filter(|m| m.locked)
            .map(|m| m.size)
            .sum()
    }

    /// Whether a record exists for `key`, without touching hit/miss counters
    pub async fn contains(&self, key: &str) -> bool {
        self.index.lock().await.contains_key(key)
    }

    /// Get current store statistics
    pub async fn stats(&self) -> StoreStats {
        let index = self.index.lock().await;
        StoreStats {
            entries: index.len(),
            total_size: index.values().map(|m| m.size).sum(),
            locked_size: index.values().filter(|m| m.locked).map(|m| m.size).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Run one garbage-collection pass against the current time
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Run one garbage-collection pass as if the clock read `now`
    ///
    /// Unlocked records older than the expiration period go first; if the
    /// store is still over its size constraint, the oldest remaining unlocked
    /// records are evicted until it fits. Each deletion re-takes the store
    /// lock, so a record re-stored while the sweep runs is left alone.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let victims = self.plan(now).await;
        self.evict(victims).await
    }

    async fn plan(&self, now: DateTime<Utc>) -> Vec<Victim> {
        let index = self.index.lock().await;
        plan_sweep(&index, now, &self.options)
    }

    /// Delete planned victims that have not been re-stored or locked since
    async fn evict(&self, victims: Vec<Victim>) -> SweepReport {
        let mut report = SweepReport::default();
        for victim in victims {
            let mut index = self.index.lock().await;

            let unchanged = index
                .get(&victim.key)
                .is_some_and(|m| !m.locked && m.stored_at == victim.stored_at);
            if !unchanged {
                debug!(key = %victim.key, "Record changed since sweep was planned, skipping");
                continue;
            }

            match discard(&mut index, &victim.key).await {
                Ok(Some(meta)) => {
                    report.bytes_freed += meta.size;
                    match victim.reason {
                        SweepReason::Expired => report.expired += 1,
                        SweepReason::OverBudget => report.evicted += 1,
                    }
                    debug!(key = %victim.key, reason = ?victim.reason, "Swept record");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %victim.key, error = %e, "Failed to sweep record");
                    report.failed += 1;
                }
            }
        }

        if report.removed() > 0 || report.failed > 0 {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                failed = report.failed,
                bytes_freed = report.bytes_freed,
                "Sweep finished"
            );
        }
        report
    }

    fn is_expired(&self, meta: &RecordMeta, now: DateTime<Utc>) -> bool {
        now - meta.stored_at > expiration(&self.options)
    }

    fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Store miss");
    }

    fn record_path(&self, key: &str) -> PathBuf {
        if self.options.use_directory_separation {
            let shard: String = key.chars().take(2).collect();
            self.options.path.join(shard).join(key)
        } else {
            self.options.path.join(key)
        }
    }

    /// Rebuild the index from record headers on disk
    ///
    /// Both flat and sharded layouts are picked up. Leftover temporary files
    /// and unreadable records are deleted.
    async fn scan(&self) -> Result<Index> {
        let mut index: Index = HashMap::new();
        let mut dirs = vec![self.options.path.clone()];
        let mut depth = 0;

        while !dirs.is_empty() && depth < 2 {
            let mut next = Vec::new();
            for dir in dirs {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let path = entry.path();
                    let file_type = entry.file_type().await?;

                    if file_type.is_dir() {
                        if !is_temporary(&name) {
                            next.push(path);
                        }
                        continue;
                    }

                    if is_temporary(&name) {
                        debug!(path = ?path, "Removing stale temporary file");
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }

                    match read_header(&path).await {
                        Ok(header) => {
                            let meta = RecordMeta {
                                path,
                                size: header.payload_len,
                                stored_at: header.stored_at,
                                locked: header.locked,
                            };
                            // Same key in both layouts: keep the newer copy
                            let keep_existing = index
                                .get(&name)
                                .is_some_and(|existing| existing.stored_at >= meta.stored_at);
                            let stale = if keep_existing {
                                Some(meta.path)
                            } else {
                                index.insert(name, meta).map(|old| old.path)
                            };
                            if let Some(stale) = stale {
                                warn!(path = ?stale, "Removing duplicate record");
                                let _ = fs::remove_file(&stale).await;
                            }
                        }
                        Err(e) => {
                            warn!(path = ?path, error = %e, "Removing unreadable record");
                            let _ = fs::remove_file(&path).await;
                        }
                    }
                }
            }
            dirs = next;
            depth += 1;
        }

        Ok(index)
    }
}

/// Read and sanity-check the header of a record file
async fn read_header(path: &Path) -> Result<RecordHeader> {
    let mut file = fs::File::open(path).await?;
    let file_len = file.metadata().await?.len();

    let mut buf = [0u8; HEADER_LEN];
    if let Err(e) = file.read_exact(&mut buf).await {
        if e.kind() == ErrorKind::UnexpectedEof {
            return Err(StoreError::Corrupt(format!("file is {} bytes", file_len)));
        }
        return Err(e.into());
    }

    let header = RecordHeader::decode(&buf)?;
    if file_len != HEADER_LEN as u64 + header.payload_len {
        return Err(StoreError::Corrupt(format!(
            "file is {} bytes, header says payload is {}",
            file_len, header.payload_len
        )));
    }
    Ok(header)
}

/// Remove a record from the index and disk
///
/// A file that is already gone counts as removed. On any other failure the
/// index entry is kept so a later pass can retry.
async fn discard(index: &mut Index, key: &str) -> Result<Option<RecordMeta>> {
    let Some(meta) = index.remove(key) else {
        return Ok(None);
    };

    match fs::remove_file(&meta.path).await {
        Ok(()) => Ok(Some(meta)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(meta)),
        Err(e) => {
            index.insert(key.to_string(), meta);
            Err(e.into())
        }
    }
}

/// Best-effort [`discard`] for read paths
async fn reap(index: &mut Index, key: &str) {
    if let Err(e) = discard(index, key).await {
        warn!(key = %key, error = %e, "Failed to remove record");
    }
}

fn expiration(options: &StoreOptions) -> TimeDelta {
    TimeDelta::from_std(options.expiration).unwrap_or(TimeDelta::MAX)
}

/// Pick the records one sweep should delete
fn plan_sweep(index: &Index, now: DateTime<Utc>, options: &StoreOptions) -> Vec<Victim> {
    let max_age = expiration(options);
    let mut total: u64 = index.values().map(|m| m.size).sum();
    let mut victims = Vec::new();
    let mut survivors = Vec::new();

    for (key, meta) in index {
        if meta.locked {
            continue;
        }
        if now - meta.stored_at > max_age {
            total -= meta.size;
            victims.push(Victim {
                key: key.clone(),
                stored_at: meta.stored_at,
                reason: SweepReason::Expired,
            });
        } else {
            survivors.push((key, meta));
        }
    }

    if total > options.size_constraint_bytes {
        survivors.sort_by(|a, b| a.1.stored_at.cmp(&b.1.stored_at).then_with(|| a.0.cmp(b.0)));
        for (key, meta) in survivors {
            if total <= options.size_constraint_bytes {
                break;
            }
            total -= meta.size;
            victims.push(Victim {
                key: key.clone(),
                stored_at: meta.stored_at,
                reason: SweepReason::OverBudget,
            });
        }
    }

    victims
}

/// Keys must be a single, non-hidden path component
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
