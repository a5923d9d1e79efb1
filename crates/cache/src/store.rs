use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stratum_core::{BlobDescription, CheckInfo, RetentionEntry, now_ms};
use stratum_storage::{
    BlobStorage, HashingReader, HashingSink, ListCallback, PayloadReader, PayloadWriter,
    RetentionCallback, StorageError, digest_bytes,
};

use crate::config::CacheConfig;
use crate::filter::{BloomFilter, FALSE_POSITIVE_RATE};
use crate::lru::{CacheEntry, LruIndex};

const SPOOL_CHUNK: usize = 64 * 1024;

struct FilterState {
    bloom: BloomFilter,
    dirty: bool,
    /// Ids inserted while a rebuild is in progress, replayed into the new filter.
    rebuild_log: Option<Vec<String>>,
}

struct CacheInner {
    config: CacheConfig,
    index: Mutex<LruIndex>,
    filter: Mutex<FilterState>,
    ram_bytes: AtomicU64,
    clock: AtomicU64,
}

/// Snapshot of a cache entry taken under the index lock.
struct Hit {
    desc: BlobDescription,
    data: Option<Bytes>,
    file: PathBuf,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub ram_bytes: u64,
}

/// Bounded hybrid memory/disk LRU cache tier.
///
/// Shared by all tenants and keyed by blob id; callers compare the tenant in
/// the returned description. Every payload is spooled to a file under
/// [`CacheConfig::path`]; payloads below the RAM threshold are also held in
/// memory until RAM pressure drops them.
pub struct CacheStorage {
    inner: Arc<CacheInner>,
    cancel: CancellationToken,
    rebuild_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("path", &self.inner.config.path)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CacheStorage {
    pub fn new(config: CacheConfig) -> Self {
        let bloom = BloomFilter::with_capacity(config.max_count, FALSE_POSITIVE_RATE);
        Self {
            inner: Arc::new(CacheInner {
                config,
                index: Mutex::new(LruIndex::default()),
                filter: Mutex::new(FilterState {
                    bloom,
                    dirty: false,
                    rebuild_log: None,
                }),
                ram_bytes: AtomicU64::new(0),
                clock: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            rebuild_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.index.lock().len(),
            ram_bytes: self.inner.ram_bytes.load(Ordering::Relaxed),
        }
    }

    /// Whether `id` is cached with its payload held in memory.
    ///
    /// `None` when the id is not cached at all.
    pub fn is_in_ram(&self, id: &str) -> Option<bool> {
        let mut index = self.inner.index.lock();
        index.get_mut(id).map(|e| e.data.is_some())
    }

    /// Whether the existence filter has pending removals.
    pub fn filter_dirty(&self) -> bool {
        self.inner.filter.lock().dirty
    }

    /// Rebuild the existence filter from the live entries if it is dirty.
    ///
    /// Returns `true` when a rebuild happened. Normally driven by the
    /// background task started in [`BlobStorage::init`].
    pub fn rebuild_filter(&self) -> bool {
        self.inner.rebuild_filter()
    }

    fn lookup(&self, id: &str) -> Option<Hit> {
        self.inner.lookup(id)
    }

    fn not_found(id: &str) -> StorageError {
        StorageError::NotFound(format!("blob {id} in cache"))
    }

    /// Open a spool file. A file removed by a concurrent eviction reads as `NotFound`.
    async fn open_spool(id: &str, path: &Path) -> Result<File, StorageError> {
        File::open(path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Self::not_found(id)
            } else {
                StorageError::Io(e)
            }
        })
    }

    fn spool_path(&self) -> PathBuf {
        self.inner
            .config
            .path
            .join(format!("{}.bin", uuid::Uuid::new_v4().simple()))
    }

    async fn remove_files(files: Vec<PathBuf>) {
        for file in files {
            if let Err(e) = fs::remove_file(&file).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(file = %file.display(), error = %e, "failed to remove cache file");
            }
        }
    }
}

impl CacheInner {
    fn touch(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lookup(&self, id: &str) -> Option<Hit> {
        if !self.filter.lock().bloom.contains(id) {
            return None;
        }
        let mut index = self.index.lock();
        let entry = index.get_mut(id)?;
        entry.last_access = self.touch();
        Some(Hit {
            desc: entry.desc.clone(),
            data: entry.data.clone(),
            file: entry.file.clone(),
        })
    }

    fn mark_inserted(&self, id: &str) {
        let mut filter = self.filter.lock();
        filter.bloom.insert(id);
        if let Some(log) = filter.rebuild_log.as_mut() {
            log.push(id.to_owned());
        }
    }

    fn mark_dirty(&self) {
        self.filter.lock().dirty = true;
    }

    fn rebuild_filter(&self) -> bool {
        {
            let mut filter = self.filter.lock();
            if !filter.dirty || filter.rebuild_log.is_some() {
                return false;
            }
            filter.dirty = false;
            filter.rebuild_log = Some(Vec::new());
        }

        // Anything inserted after this snapshot lands in the rebuild log.
        let ids = self.index.lock().ids();
        let mut bloom = BloomFilter::with_capacity(self.config.max_count, FALSE_POSITIVE_RATE);
        for id in &ids {
            bloom.insert(id);
        }

        let mut filter = self.filter.lock();
        for id in filter.rebuild_log.take().unwrap_or_default() {
            bloom.insert(&id);
        }
        filter.bloom = bloom;
        debug!(entries = ids.len(), "cache existence filter rebuilt");
        true
    }

    /// Enforce count and RAM bounds. Returns the files of evicted entries.
    fn enforce_limits(&self, index: &mut LruIndex) -> Vec<PathBuf> {
        let mut evicted = Vec::new();
        while index.len() > self.config.max_count {
            let Some(entry) = index.evict_oldest() else {
                break;
            };
            if let Some(data) = &entry.data {
                self.ram_bytes.fetch_sub(data.len() as u64, Ordering::Relaxed);
            }
            debug!(blob_id = %entry.desc.blob_id, "evicted from cache");
            evicted.push(entry.file);
        }
        if !evicted.is_empty() {
            self.mark_dirty();
        }

        while self.ram_bytes.load(Ordering::Relaxed) > self.config.max_ram_size {
            let Some(released) = index.drop_oldest_data() else {
                break;
            };
            self.ram_bytes.fetch_sub(released, Ordering::Relaxed);
        }
        evicted
    }
}

#[async_trait]
impl BlobStorage for CacheStorage {
    async fn init(&self) -> Result<(), StorageError> {
        if self.inner.config.filter_rebuild_interval.is_zero() {
            return Err(StorageError::InvalidInput(
                "cache filter rebuild interval must be non-zero".into(),
            ));
        }
        let path = &self.inner.config.path;
        fs::create_dir_all(path).await?;

        // Spool files from a previous process have no index entry.
        let mut dir = fs::read_dir(path).await?;
        let mut stale = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file = entry.path();
            if file.extension().and_then(|e| e.to_str()) == Some("bin") {
                stale.push(file);
            }
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "removing stale cache files");
            Self::remove_files(stale).await;
        }

        let mut task = self.rebuild_task.lock();
        if task.is_none() {
            let inner = Arc::clone(&self.inner);
            let cancel = self.cancel.clone();
            *task = Some(tokio::spawn(async move {
                let mut ticker = interval(inner.config.filter_rebuild_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            inner.rebuild_filter();
                        }
                    }
                }
                debug!("cache filter rebuild task stopped");
            }));
        }
        Ok(())
    }

    fn tenant(&self) -> &str {
        ""
    }

    async fn list_blobs(&self, callback: &mut ListCallback<'_>) -> Result<(), StorageError> {
        let ids = self.inner.index.lock().ids();
        for id in &ids {
            if !callback(id) {
                break;
            }
        }
        Ok(())
    }

    async fn store_blob(
        &self,
        desc: &mut BlobDescription,
        payload: &mut PayloadReader<'_>,
    ) -> Result<String, StorageError> {
        let id = desc.ensure_id().to_owned();
        if self.lookup(&id).is_some() {
            return Err(StorageError::AlreadyExists(id));
        }

        let threshold = self.inner.config.ram_threshold;
        let file_path = self.spool_path();
        let mut file = File::create(&file_path).await?;
        let mut reader = HashingReader::new(payload);
        let mut ram: Option<Vec<u8>> = Some(Vec::new());
        let mut chunk = vec![0u8; SPOOL_CHUNK];
        let spooled: std::io::Result<()> = async {
            loop {
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                file.write_all(&chunk[..n]).await?;
                if let Some(buf) = ram.as_mut() {
                    if (buf.len() + n) as u64 >= threshold {
                        ram = None;
                    } else {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
            file.flush().await
        }
        .await;
        drop(file);
        if let Err(e) = spooled {
            Self::remove_files(vec![file_path]).await;
            return Err(StorageError::Io(e));
        }

        let (hash, len) = reader.finish();
        if desc.content_length > 0 && desc.content_length != len {
            Self::remove_files(vec![file_path]).await;
            return Err(StorageError::InvalidInput(format!(
                "blob {id}: declared {} bytes, received {len}",
                desc.content_length
            )));
        }
        desc.content_length = len;
        desc.hash = hash;
        desc.ensure_timestamps(now_ms());

        let data = ram.map(Bytes::from);
        let ram_len = data.as_ref().map_or(0, |d| d.len() as u64);
        let entry = CacheEntry {
            last_access: self.inner.touch(),
            desc: desc.clone(),
            data,
            file: file_path,
        };

        let inserted = {
            let mut index = self.inner.index.lock();
            match index.insert(entry) {
                Err(lost) => Err(lost.file),
                Ok(()) => {
                    self.inner.ram_bytes.fetch_add(ram_len, Ordering::Relaxed);
                    // Filter insert happens under the index lock so a rebuild
                    // snapshot never misses a live entry.
                    self.inner.mark_inserted(&id);
                    Ok(self.inner.enforce_limits(&mut index))
                }
            }
        };
        match inserted {
            Ok(evicted) => {
                Self::remove_files(evicted).await;
                Ok(id)
            }
            Err(orphan) => {
                Self::remove_files(vec![orphan]).await;
                Err(StorageError::AlreadyExists(id))
            }
        }
    }

    async fn has_blob(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.lookup(id).is_some())
    }

    async fn get_blob_description(&self, id: &str) -> Result<BlobDescription, StorageError> {
        self.lookup(id)
            .map(|hit| hit.desc)
            .ok_or_else(|| Self::not_found(id))
    }

    async fn update_blob_description(
        &self,
        id: &str,
        desc: &BlobDescription,
    ) -> Result<(), StorageError> {
        let mut index = self.inner.index.lock();
        let entry = index.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        let mut updated = desc.clone();
        updated.blob_id = id.to_owned();
        updated.keep_content_fields(&entry.desc);
        entry.desc = updated;
        Ok(())
    }

    async fn retrieve_blob(
        &self,
        id: &str,
        sink: &mut PayloadWriter<'_>,
    ) -> Result<(), StorageError> {
        let hit = self.lookup(id).ok_or_else(|| Self::not_found(id))?;
        if let Some(data) = hit.data {
            sink.write_all(&data).await?;
        } else {
            let mut file = Self::open_spool(id, &hit.file).await?;
            tokio::io::copy(&mut file, &mut *sink).await?;
        }
        sink.flush().await?;
        Ok(())
    }

    async fn delete_blob(&self, id: &str) -> Result<(), StorageError> {
        let entry = self
            .inner
            .index
            .lock()
            .remove(id)
            .ok_or_else(|| Self::not_found(id))?;
        if let Some(data) = &entry.data {
            self.inner
                .ram_bytes
                .fetch_sub(data.len() as u64, Ordering::Relaxed);
        }
        self.inner.mark_dirty();
        Self::remove_files(vec![entry.file]).await;
        Ok(())
    }

    async fn check_blob(&self, id: &str) -> Result<CheckInfo, StorageError> {
        let hit = self.lookup(id).ok_or_else(|| Self::not_found(id))?;
        let (actual, len) = match &hit.data {
            Some(data) => (digest_bytes(data), data.len() as u64),
            None => {
                let mut file = Self::open_spool(id, &hit.file).await?;
                let mut sink = HashingSink::new();
                tokio::io::copy(&mut file, &mut sink).await?;
                sink.finish()
            }
        };
        let now = now_ms();
        let info = if actual != hit.desc.hash {
            CheckInfo::unhealthy(
                now,
                format!("hash mismatch: stored {}, actual {actual}", hit.desc.hash),
            )
        } else if len != hit.desc.content_length {
            CheckInfo::unhealthy(
                now,
                format!(
                    "length mismatch: stored {}, actual {len}",
                    hit.desc.content_length
                ),
            )
        } else {
            CheckInfo::healthy(now)
        };
        if let Some(entry) = self.inner.index.lock().get_mut(id) {
            entry.desc.check = Some(info.clone());
        }
        Ok(info)
    }

    async fn get_all_retentions(
        &self,
        _callback: &mut RetentionCallback<'_>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn add_retention(&self, _entry: &RetentionEntry) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("retention on the cache tier".into()))
    }

    async fn get_retention(&self, _id: &str) -> Result<RetentionEntry, StorageError> {
        Err(StorageError::NotImplemented("retention on the cache tier".into()))
    }

    async fn delete_retention(&self, _id: &str) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("retention on the cache tier".into()))
    }

    async fn reset_retention(&self, _id: &str) -> Result<RetentionEntry, StorageError> {
        Err(StorageError::NotImplemented("retention on the cache tier".into()))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.cancel.cancel();
        let task = self.rebuild_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "cache filter rebuild task failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(dir: &tempfile::TempDir) -> CacheStorage {
        CacheStorage::new(CacheConfig::at(dir.path()))
    }

    #[tokio::test]
    async fn retention_is_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let err = cache.get_retention("x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotImplemented(_)));

        let mut seen = 0;
        cache
            .get_all_retentions(&mut |_: RetentionEntry| {
                seen += 1;
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, 0);
    }

    #[tokio::test]
    async fn lookups_refresh_access_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache.init().await.unwrap();
        let mut desc = BlobDescription::new("t", "a", "text/plain").with_id("a");
        cache.store_blob(&mut desc, &mut &b"a"[..]).await.unwrap();

        let before = cache.inner.index.lock().get_mut("a").unwrap().last_access;
        cache.has_blob("a").await.unwrap();
        let after = cache.inner.index.lock().get_mut("a").unwrap().last_access;
        assert!(after > before);
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn rebuild_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache.init().await.unwrap();
        assert!(!cache.rebuild_filter());

        let mut desc = BlobDescription::new("t", "a", "text/plain").with_id("gone");
        cache.store_blob(&mut desc, &mut &b"bye"[..]).await.unwrap();
        cache.delete_blob("gone").await.unwrap();
        assert!(cache.filter_dirty());
        assert!(cache.rebuild_filter());
        assert!(!cache.filter_dirty());
        assert!(!cache.inner.filter.lock().bloom.contains("gone"));
        cache.close().await.unwrap();
    }
}
