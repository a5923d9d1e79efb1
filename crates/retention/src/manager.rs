use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stratum_core::{RetentionEntry, now_ms};
use stratum_storage::{BlobStorage, StorageError, list_retentions};

/// Configuration for the [`RetentionManager`].
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Maximum number of entries tracked in memory (default: 10 000).
    pub max_size: usize,
    /// How often expired blobs are swept (default: 60 seconds).
    pub tick_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// Resolves tenants and their storage for the sweep.
///
/// Deletions go through the returned storage, so resolving to the
/// orchestrator rather than a raw tier cleans up every tier at once.
#[async_trait]
pub trait TenantStorageResolver: Send + Sync {
    /// All known tenants.
    async fn tenants(&self) -> Result<Vec<String>, StorageError>;

    /// Storage owning the blobs of `tenant`.
    async fn storage_for(&self, tenant: &str) -> Result<Arc<dyn BlobStorage>, StorageError>;
}

/// Lifecycle of a [`RetentionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionState {
    Uninitialized,
    Running,
    Stopped,
}

/// Keeps an expiry-sorted, capacity-bounded list of retention entries and
/// deletes blobs once they expire.
///
/// The list is a window onto the persisted entries: anything truncated off
/// the tail stays persisted in its tier and comes back on the next refresh.
pub struct RetentionManager {
    config: RetentionConfig,
    resolver: Weak<dyn TenantStorageResolver>,
    entries: Mutex<Vec<RetentionEntry>>,
    state: Mutex<RetentionState>,
    closed: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl RetentionManager {
    /// Create a manager. Nothing runs until [`RetentionManager::init`].
    pub fn new(config: RetentionConfig, resolver: Weak<dyn TenantStorageResolver>) -> Self {
        Self {
            config,
            resolver,
            entries: Mutex::new(Vec::new()),
            state: Mutex::new(RetentionState::Uninitialized),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn state(&self) -> RetentionState {
        *self.state.lock()
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of the tracked entries, nearest expiry first.
    pub fn entries(&self) -> Vec<RetentionEntry> {
        self.entries.lock().clone()
    }

    /// Load every persisted entry and start the periodic sweep.
    ///
    /// Calling it again while running is a no-op. Fails with
    /// [`StorageError::InvalidInput`] for a zero tick interval.
    pub async fn init(self: &Arc<Self>) -> Result<(), StorageError> {
        if self.config.tick_interval.is_zero() {
            return Err(StorageError::InvalidInput(
                "retention tick interval must be non-zero".into(),
            ));
        }
        {
            let state = self.state.lock();
            if *state != RetentionState::Uninitialized {
                debug!(state = ?*state, "retention manager already initialized");
                return Ok(());
            }
        }

        self.refresh().await;

        let mut task = self.task.lock();
        let mut state = self.state.lock();
        if *state != RetentionState::Uninitialized {
            return Ok(());
        }
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            manager.run(cancel).await;
        }));
        *state = RetentionState::Running;
        info!(
            entries = self.len(),
            interval_secs = self.config.tick_interval.as_secs(),
            "retention manager started"
        );
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; init has just loaded the list.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("retention manager received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One sweep followed by a refresh from all tenants.
    pub async fn tick(&self) {
        let deleted = self.sweep_expired(now_ms()).await;
        if deleted > 0 {
            info!(deleted, "retention sweep removed expired blobs");
        }
        self.refresh().await;
    }

    /// Delete every tracked blob that expired at or before `now`.
    ///
    /// Delete failures are logged and the entry is dropped from the list; it
    /// is reloaded on the next refresh if it is still persisted. Returns the
    /// number of blobs deleted.
    pub async fn sweep_expired(&self, now: i64) -> usize {
        let due: Vec<RetentionEntry> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .take_while(|e| e.is_expired(now))
                .cloned()
                .collect()
        };
        if due.is_empty() {
            return 0;
        }

        let mut storages: HashMap<String, Option<Arc<dyn BlobStorage>>> = HashMap::new();
        let mut deleted = 0;
        for entry in due {
            if self.cancel.is_cancelled() {
                debug!("retention sweep cancelled");
                break;
            }
            let storage = match storages.entry(entry.tenant_id.clone()) {
                Entry::Occupied(slot) => slot.get().clone(),
                Entry::Vacant(slot) => slot.insert(self.resolve(&entry.tenant_id).await).clone(),
            };
            let Some(storage) = storage else {
                continue;
            };

            match storage.delete_blob(&entry.blob_id).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(
                        tenant = %entry.tenant_id,
                        blob_id = %entry.blob_id,
                        filename = %entry.filename,
                        "expired blob deleted"
                    );
                }
                Err(e) if e.is_not_found() => {
                    debug!(tenant = %entry.tenant_id, blob_id = %entry.blob_id, "expired blob already gone");
                }
                Err(e) => {
                    warn!(
                        tenant = %entry.tenant_id,
                        blob_id = %entry.blob_id,
                        error = %e,
                        "failed to delete expired blob"
                    );
                }
            }
            self.remove(&entry.tenant_id, &entry.blob_id);
        }
        deleted
    }

    async fn resolve(&self, tenant: &str) -> Option<Arc<dyn BlobStorage>> {
        let resolver = self.resolver.upgrade()?;
        match resolver.storage_for(tenant).await {
            Ok(storage) => Some(storage),
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "cannot resolve tenant storage, skipping");
                None
            }
        }
    }

    /// Replace the list with every persisted entry across all tenants.
    pub async fn refresh(&self) {
        let Some(resolver) = self.resolver.upgrade() else {
            debug!("tenant resolver dropped, skipping retention refresh");
            return;
        };
        let tenants = match resolver.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "cannot list tenants for retention refresh");
                return;
            }
        };

        let mut loaded = Vec::new();
        for tenant in tenants {
            if self.cancel.is_cancelled() {
                return;
            }
            let Some(storage) = self.resolve(&tenant).await else {
                continue;
            };
            match list_retentions(storage.as_ref()).await {
                Ok(entries) => loaded.extend(entries),
                Err(e) => {
                    warn!(tenant = %tenant, error = %e, "failed to load retention entries");
                }
            }
        }

        loaded.sort_by_key(RetentionEntry::expires_at_ms);
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(loaded.len().min(self.config.max_size));
        for entry in loaded {
            if fresh.len() >= self.config.max_size {
                break;
            }
            if !seen.insert((entry.tenant_id.clone(), entry.blob_id.clone())) {
                warn!(tenant = %entry.tenant_id, blob_id = %entry.blob_id, "duplicate retention entry ignored");
                continue;
            }
            fresh.push(entry);
        }
        *self.entries.lock() = fresh;
    }

    /// Track a new entry. Entries are keyed by tenant and blob id.
    ///
    /// Returns `Ok(false)` when the entry expires later than everything in a
    /// full list; it stays persisted and is picked up by a later refresh.
    pub fn add_retention(&self, entry: RetentionEntry) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|e| e.tenant_id == entry.tenant_id && e.blob_id == entry.blob_id)
        {
            return Err(StorageError::AlreadyExists(format!(
                "retention for blob {} in tenant {}",
                entry.blob_id, entry.tenant_id
            )));
        }
        let expires = entry.expires_at_ms();
        let pos = entries.partition_point(|e| e.expires_at_ms() <= expires);
        if pos >= self.config.max_size {
            return Ok(false);
        }
        entries.insert(pos, entry);
        entries.truncate(self.config.max_size);
        Ok(true)
    }

    /// Stop tracking `id` of `tenant` without touching persisted state.
    pub fn remove(&self, tenant: &str, id: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.tenant_id != tenant || e.blob_id != id);
        entries.len() != before
    }

    /// Delete the persisted entry in `storage` and stop tracking it.
    pub async fn delete_retention(
        &self,
        storage: &dyn BlobStorage,
        id: &str,
    ) -> Result<(), StorageError> {
        storage.delete_retention(id).await?;
        self.remove(storage.tenant(), id);
        Ok(())
    }

    /// Restart the countdown of `id` from now, persisting it in `storage`.
    pub async fn reset_retention(
        &self,
        storage: &dyn BlobStorage,
        id: &str,
    ) -> Result<RetentionEntry, StorageError> {
        let mut entry = storage.get_retention(id).await?;
        entry.retention_base = now_ms();
        storage.add_retention(&entry).await?;
        self.remove(&entry.tenant_id, id);
        // A full list may not have room; the entry stays persisted either way.
        self.add_retention(entry.clone())?;
        Ok(entry)
    }

    /// Stop the periodic sweep. A second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "retention task failed");
        }
        *self.state.lock() = RetentionState::Stopped;
        info!("retention manager stopped");
    }
}
