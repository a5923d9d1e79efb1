use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use stratum_core::{BlobDescription, CheckInfo, RetentionEntry, now_ms};
use stratum_retention::RetentionManager;
use stratum_storage::{
    BlobStorage, ListCallback, PayloadReader, PayloadWriter, RetentionCallback, StorageError,
    copy_blob,
};

use crate::index::{BlobIndex, SearchCallback};
use crate::metrics::GatewayMetrics;
use crate::tenant::TenantDirectory;

/// Removes its id from the in-flight set when dropped.
struct InFlight {
    set: Arc<DashSet<String>>,
    id: String,
}

impl InFlight {
    fn acquire(set: &Arc<DashSet<String>>, id: &str) -> Option<Self> {
        set.insert(id.to_owned()).then(|| Self {
            set: Arc::clone(set),
            id: id.to_owned(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

pub(crate) struct GatewayInner {
    pub(crate) tenant: String,
    pub(crate) primary: Arc<dyn BlobStorage>,
    pub(crate) backup: Option<Arc<dyn BlobStorage>>,
    pub(crate) tenant_backup: Option<Arc<dyn BlobStorage>>,
    pub(crate) cache: Option<Arc<dyn BlobStorage>>,
    pub(crate) index: Option<Arc<dyn BlobIndex>>,
    pub(crate) retention: Option<Arc<RetentionManager>>,
    pub(crate) tenants: Option<Arc<dyn TenantDirectory>>,
    pub(crate) sync_mode: bool,
    pub(crate) metrics: Arc<GatewayMetrics>,
    pub(crate) tracker: TaskTracker,
    pub(crate) storing: Arc<DashSet<String>>,
    pub(crate) restoring: Arc<DashSet<String>>,
}

/// One tenant's logical blob store composed of physical tiers.
///
/// Writes go to the primary tier first; it is the only tier whose failure
/// aborts a write. Backups, the cache, the index and tenant accounting are
/// best effort: their errors are logged and never undo a primary write.
/// Reads cascade cache, primary, backup, and a backup hit restores the blob
/// to the primary tier and the cache in the background.
///
/// Built with [`StorageGatewayBuilder`](crate::StorageGatewayBuilder).
pub struct StorageGateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for StorageGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageGateway")
            .field("tenant", &self.inner.tenant)
            .field("backup", &self.inner.backup.is_some())
            .field("tenant_backup", &self.inner.tenant_backup.is_some())
            .field("cache", &self.inner.cache.is_some())
            .field("index", &self.inner.index.is_some())
            .field("sync_mode", &self.inner.sync_mode)
            .finish_non_exhaustive()
    }
}

impl StorageGateway {
    pub(crate) fn from_inner(inner: GatewayInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.inner.metrics
    }

    pub fn primary(&self) -> &Arc<dyn BlobStorage> {
        &self.inner.primary
    }

    pub fn backup(&self) -> Option<&Arc<dyn BlobStorage>> {
        self.inner.backup.as_ref()
    }

    /// The shared cache tier, which also holds other tenants' blobs.
    pub fn cache(&self) -> Option<&Arc<dyn BlobStorage>> {
        self.inner.cache.as_ref()
    }

    /// Whether backup writes complete before `store_blob` returns.
    pub fn sync_mode(&self) -> bool {
        self.inner.sync_mode
    }

    /// Wait until every background task scheduled so far has finished.
    pub async fn wait_idle(&self) {
        let tracker = &self.inner.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Visit the ids of this tenant's blobs matching `query`.
    ///
    /// Fails with `NotImplemented` when no index is configured.
    pub async fn search_blobs(
        &self,
        query: &str,
        callback: &mut SearchCallback<'_>,
    ) -> Result<(), StorageError> {
        let Some(index) = &self.inner.index else {
            return Err(StorageError::NotImplemented("search without an index".into()));
        };
        index.search(&self.inner.tenant, query, callback).await
    }
}

impl GatewayInner {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    fn replicas(&self) -> impl Iterator<Item = (&'static str, &Arc<dyn BlobStorage>)> {
        self.backup
            .iter()
            .map(|b| ("backup", b))
            .chain(self.tenant_backup.iter().map(|b| ("tenant backup", b)))
    }

    /// Cached description of `id`, if it belongs to this tenant.
    async fn cache_hit(&self, id: &str) -> Option<BlobDescription> {
        let cache = self.cache.as_ref()?;
        match cache.get_blob_description(id).await {
            Ok(desc) if desc.tenant_id == self.tenant => Some(desc),
            Ok(_) => None,
            Err(e) => {
                if !e.is_not_found() {
                    debug!(tenant = %self.tenant, blob_id = %id, error = %e, "cache lookup failed");
                }
                None
            }
        }
    }

    async fn backup_has(&self, id: &str) -> bool {
        let Some(backup) = &self.backup else {
            return false;
        };
        match backup.has_blob(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(tenant = %self.tenant, blob_id = %id, error = %e, "backup lookup failed");
                false
            }
        }
    }

    async fn replicate_to(
        &self,
        kind: &str,
        target: &dyn BlobStorage,
        desc: &BlobDescription,
    ) {
        match copy_blob(self.primary.as_ref(), target, desc).await {
            Ok(_) => debug!(tenant = %self.tenant, blob_id = %desc.blob_id, tier = kind, "blob replicated"),
            Err(e) => {
                self.metrics.increment_replication_failures();
                warn!(
                    tenant = %self.tenant,
                    blob_id = %desc.blob_id,
                    tier = kind,
                    error = %e,
                    "replication failed"
                );
            }
        }
    }

    async fn replicate(self: &Arc<Self>, desc: &BlobDescription) {
        if self.sync_mode {
            for (kind, target) in self.replicas() {
                self.replicate_to(kind, target.as_ref(), desc).await;
            }
            return;
        }
        for (kind, target) in self.replicas() {
            let this = Arc::clone(self);
            let target = Arc::clone(target);
            let desc = desc.clone();
            self.spawn(async move {
                this.replicate_to(kind, target.as_ref(), &desc).await;
            });
        }
    }

    /// Copy `id` from `source` into the cache in the background.
    fn schedule_cache_populate(self: &Arc<Self>, source: Arc<dyn BlobStorage>, id: &str) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let this = Arc::clone(self);
        let id = id.to_owned();
        self.spawn(async move {
            if matches!(cache.has_blob(&id).await, Ok(true)) {
                return;
            }
            let desc = match source.get_blob_description(&id).await {
                Ok(desc) => desc,
                Err(e) => {
                    debug!(tenant = %this.tenant, blob_id = %id, error = %e, "nothing to cache");
                    return;
                }
            };
            match copy_blob(source.as_ref(), cache.as_ref(), &desc).await {
                Ok(_) => this.metrics.increment_cache_populated(),
                Err(e) if e.is_already_exists() => return,
                Err(e) => {
                    warn!(tenant = %this.tenant, blob_id = %id, error = %e, "cache population failed");
                    return;
                }
            }
            // The blob may have been updated or deleted while it was copied.
            let refreshed = match source.get_blob_description(&id).await {
                Ok(latest) if latest == desc => Ok(()),
                Ok(latest) => cache.update_blob_description(&id, &latest).await,
                Err(e) if e.is_not_found() => cache.delete_blob(&id).await,
                Err(e) => Err(e),
            };
            if let Err(e) = refreshed {
                debug!(tenant = %this.tenant, blob_id = %id, error = %e, "cache refresh after population failed");
            }
        });
    }

    /// Restore a backup-only blob into the primary tier and the cache.
    ///
    /// Concurrent requests for the same id collapse into one restore.
    fn schedule_restore(self: &Arc<Self>, id: &str) {
        let Some(backup) = self.backup.clone() else {
            return;
        };
        if !self.restoring.insert(id.to_owned()) {
            return;
        }
        let this = Arc::clone(self);
        let id = id.to_owned();
        self.spawn(async move {
            this.restore(backup.as_ref(), &id).await;
            this.restoring.remove(&id);
            this.schedule_cache_populate(Arc::clone(&this.primary), &id);
        });
    }

    async fn restore(&self, backup: &dyn BlobStorage, id: &str) {
        let desc = match backup.get_blob_description(id).await {
            Ok(desc) => desc,
            Err(e) => {
                warn!(tenant = %self.tenant, blob_id = %id, error = %e, "restore source vanished");
                return;
            }
        };
        match copy_blob(backup, self.primary.as_ref(), &desc).await {
            Ok(_) => {
                self.metrics.increment_restored();
                info!(tenant = %self.tenant, blob_id = %id, "blob restored from backup");
            }
            Err(e) if e.is_already_exists() => {
                debug!(tenant = %self.tenant, blob_id = %id, "blob already back in primary");
            }
            Err(e) => {
                warn!(tenant = %self.tenant, blob_id = %id, error = %e, "restore from backup failed");
                return;
            }
        }
        if let Some(retention) = &self.retention
            && let Some(entry) = desc.retention_entry()
            && let Err(e) = retention.add_retention(entry)
            && !e.is_already_exists()
        {
            warn!(tenant = %self.tenant, blob_id = %id, error = %e, "failed to re-register retention");
        }
    }

    fn schedule_size_change(self: &Arc<Self>, bytes: u64, grow: bool) {
        let Some(tenants) = self.tenants.clone() else {
            return;
        };
        if bytes == 0 {
            return;
        }
        let tenant = self.tenant.clone();
        self.spawn(async move {
            let res = if grow {
                tenants.add_size(&tenant, bytes).await
            } else {
                tenants.sub_size(&tenant, bytes).await
            };
            if let Err(e) = res {
                warn!(tenant = %tenant, bytes, error = %e, "tenant size accounting failed");
            }
        });
    }

    async fn update_replica(&self, kind: &str, target: &dyn BlobStorage, desc: &BlobDescription) {
        if let Err(e) = target.update_blob_description(&desc.blob_id, desc).await {
            warn!(
                tenant = %self.tenant,
                blob_id = %desc.blob_id,
                tier = kind,
                error = %e,
                "replica metadata update failed"
            );
        }
    }

    /// Check one replica and compare its recorded hash with the primary's.
    async fn check_replica(&self, backup: &dyn BlobStorage, id: &str, primary_hash: &str) -> CheckInfo {
        let now = now_ms();
        let mut info = match backup.check_blob(id).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return CheckInfo::unhealthy(now, "backup: blob missing"),
            Err(e) => return CheckInfo::unhealthy(now, format!("backup: check failed: {e}")),
        };
        if !info.healthy {
            info.message = format!("backup: {}", info.message);
        }
        match backup.get_blob_description(id).await {
            Ok(desc) if desc.hash != primary_hash => {
                info.healthy = false;
                info.append_message(&format!(
                    "hash differs between primary ({primary_hash}) and backup ({})",
                    desc.hash
                ));
            }
            Ok(_) => {}
            Err(e) => {
                info.healthy = false;
                info.append_message(&format!("backup: description unreadable: {e}"));
            }
        }
        info
    }

    async fn record_check(&self, kind: &str, tier: &dyn BlobStorage, id: &str, info: &CheckInfo) {
        let res = match tier.get_blob_description(id).await {
            Ok(mut desc) => {
                desc.check = Some(info.clone());
                tier.update_blob_description(id, &desc).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = res
            && !e.is_not_found()
        {
            warn!(tenant = %self.tenant, blob_id = %id, tier = kind, error = %e, "failed to record check");
        }
    }
}

#[async_trait]
impl BlobStorage for StorageGateway {
    /// Initialize the tiers owned by this gateway. The shared cache, index
    /// and retention manager are initialized by their owner.
    async fn init(&self) -> Result<(), StorageError> {
        let inner = &self.inner;
        inner.primary.init().await?;
        for (kind, replica) in inner.replicas() {
            if let Err(e) = replica.init().await {
                error!(tenant = %inner.tenant, tier = kind, error = %e, "replica tier failed to initialize");
            }
        }
        debug!(tenant = %inner.tenant, "storage gateway initialized");
        Ok(())
    }

    fn tenant(&self) -> &str {
        &self.inner.tenant
    }

    async fn list_blobs(&self, callback: &mut ListCallback<'_>) -> Result<(), StorageError> {
        self.inner.primary.list_blobs(callback).await
    }

    async fn store_blob(
        &self,
        desc: &mut BlobDescription,
        payload: &mut PayloadReader<'_>,
    ) -> Result<String, StorageError> {
        let inner = &self.inner;
        let id = desc.ensure_id().to_owned();
        let Some(_guard) = InFlight::acquire(&inner.storing, &id) else {
            return Err(StorageError::AlreadyExists(id));
        };
        if inner.primary.has_blob(&id).await? {
            return Err(StorageError::AlreadyExists(id));
        }
        if desc.tenant_id.is_empty() {
            desc.tenant_id.clone_from(&inner.tenant);
        }
        desc.ensure_timestamps(now_ms());

        inner.primary.store_blob(desc, payload).await?;
        inner.metrics.increment_stored();

        if let Some(index) = &inner.index
            && let Err(e) = index.index(desc).await
        {
            error!(tenant = %inner.tenant, blob_id = %id, error = %e, "indexing failed, rolling back");
            if let Err(rollback) = inner.primary.delete_blob(&id).await {
                error!(tenant = %inner.tenant, blob_id = %id, error = %rollback, "rollback after index failure failed");
            }
            return Err(e);
        }

        if let Some(retention) = &inner.retention
            && let Some(entry) = desc.retention_entry()
            && let Err(e) = retention.add_retention(entry)
        {
            warn!(tenant = %inner.tenant, blob_id = %id, error = %e, "failed to register retention");
        }

        inner.replicate(desc).await;
        inner.schedule_cache_populate(Arc::clone(&inner.primary), &id);
        inner.schedule_size_change(desc.content_length, true);
        debug!(tenant = %inner.tenant, blob_id = %id, bytes = desc.content_length, "blob stored");
        Ok(id)
    }

    async fn has_blob(&self, id: &str) -> Result<bool, StorageError> {
        let inner = &self.inner;
        if inner.cache_hit(id).await.is_some() {
            inner.metrics.increment_cache_hits();
            return Ok(true);
        }
        let primary = inner.primary.has_blob(id).await;
        if let Ok(true) = primary {
            return Ok(true);
        }
        if inner.backup_has(id).await {
            inner.schedule_restore(id);
            return Ok(true);
        }
        primary
    }

    async fn get_blob_description(&self, id: &str) -> Result<BlobDescription, StorageError> {
        let inner = &self.inner;
        if let Some(desc) = inner.cache_hit(id).await {
            inner.metrics.increment_cache_hits();
            return Ok(desc);
        }
        let primary_err = match inner.primary.get_blob_description(id).await {
            Ok(desc) => {
                inner.metrics.increment_primary_reads();
                return Ok(desc);
            }
            Err(e) => e,
        };
        if let Some(backup) = &inner.backup {
            match backup.get_blob_description(id).await {
                Ok(desc) => {
                    inner.metrics.increment_backup_reads();
                    inner.schedule_restore(id);
                    return Ok(desc);
                }
                Err(e) if !e.is_not_found() => {
                    warn!(tenant = %inner.tenant, blob_id = %id, error = %e, "backup lookup failed");
                }
                Err(_) => {}
            }
        }
        Err(primary_err)
    }

    async fn update_blob_description(
        &self,
        id: &str,
        desc: &BlobDescription,
    ) -> Result<(), StorageError> {
        let inner = &self.inner;
        inner.primary.update_blob_description(id, desc).await?;
        let stored = match inner.primary.get_blob_description(id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(tenant = %inner.tenant, blob_id = %id, error = %e, "updated description unreadable");
                let mut fallback = desc.clone();
                fallback.blob_id = id.to_owned();
                fallback
            }
        };

        if let Some(index) = &inner.index
            && let Err(e) = index.update(&stored).await
        {
            warn!(tenant = %inner.tenant, blob_id = %id, error = %e, "index update failed");
        }

        if inner.sync_mode {
            for (kind, replica) in inner.replicas() {
                inner.update_replica(kind, replica.as_ref(), &stored).await;
            }
        } else {
            for (kind, replica) in inner.replicas() {
                let this = Arc::clone(inner);
                let replica = Arc::clone(replica);
                let stored = stored.clone();
                inner.spawn(async move {
                    this.update_replica(kind, replica.as_ref(), &stored).await;
                });
            }
        }

        // The cache is shared; only touch an entry this tenant owns.
        if let Some(cache) = &inner.cache
            && inner.cache_hit(id).await.is_some()
            && let Err(e) = cache.update_blob_description(id, &stored).await
            && !e.is_not_found()
        {
            warn!(tenant = %inner.tenant, blob_id = %id, error = %e, "cache metadata update failed");
        }
        Ok(())
    }

    async fn retrieve_blob(
        &self,
        id: &str,
        sink: &mut PayloadWriter<'_>,
    ) -> Result<(), StorageError> {
        let inner = &self.inner;
        if let (Some(cache), Some(_)) = (&inner.cache, inner.cache_hit(id).await) {
            match cache.retrieve_blob(id, sink).await {
                Ok(()) => {
                    inner.metrics.increment_cache_hits();
                    return Ok(());
                }
                // Evicted between lookup and read; nothing was written yet.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let primary = inner.primary.has_blob(id).await;
        if let Ok(true) = primary {
            inner.primary.retrieve_blob(id, sink).await?;
            inner.metrics.increment_primary_reads();
            inner.schedule_cache_populate(Arc::clone(&inner.primary), id);
            return Ok(());
        }

        if let Some(backup) = &inner.backup
            && inner.backup_has(id).await
        {
            backup.retrieve_blob(id, sink).await?;
            inner.metrics.increment_backup_reads();
            inner.schedule_restore(id);
            return Ok(());
        }

        match primary {
            Err(e) => Err(e),
            Ok(_) => Err(StorageError::NotFound(format!(
                "blob {id} in tenant {}",
                inner.tenant
            ))),
        }
    }

    async fn delete_blob(&self, id: &str) -> Result<(), StorageError> {
        let inner = &self.inner;
        let length = inner
            .primary
            .get_blob_description(id)
            .await
            .map(|d| d.content_length)
            .unwrap_or_default();
        inner.primary.delete_blob(id).await?;
        inner.metrics.increment_deleted();
        inner.schedule_size_change(length, false);

        for (kind, replica) in inner.replicas() {
            match replica.delete_blob(id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(tenant = %inner.tenant, blob_id = %id, tier = kind, "replica had no copy");
                }
                Err(e) => {
                    warn!(tenant = %inner.tenant, blob_id = %id, tier = kind, error = %e, "replica delete failed");
                }
            }
        }

        if let Some(retention) = &inner.retention {
            retention.remove(&inner.tenant, id);
        }

        if let Some(cache) = &inner.cache
            && inner.cache_hit(id).await.is_some()
            && let Err(e) = cache.delete_blob(id).await
            && !e.is_not_found()
        {
            warn!(tenant = %inner.tenant, blob_id = %id, error = %e, "cache delete failed");
        }

        if let Some(index) = &inner.index
            && let Err(e) = index.remove(&inner.tenant, id).await
        {
            warn!(tenant = %inner.tenant, blob_id = %id, error = %e, "index removal failed");
        }
        debug!(tenant = %inner.tenant, blob_id = %id, "blob deleted");
        Ok(())
    }

    async fn check_blob(&self, id: &str) -> Result<CheckInfo, StorageError> {
        let inner = &self.inner;
        let mut info = inner.primary.check_blob(id).await?;
        if !info.healthy {
            info.message = format!("primary: {}", info.message);
        }

        if let Some(backup) = &inner.backup {
            let primary_hash = inner.primary.get_blob_description(id).await?.hash;
            let backup_info = inner.check_replica(backup.as_ref(), id, &primary_hash).await;
            info = info.merge(&backup_info);
            inner.record_check("primary", inner.primary.as_ref(), id, &info).await;
            inner.record_check("backup", backup.as_ref(), id, &info).await;
        }
        if let Some(cache) = &inner.cache
            && inner.cache_hit(id).await.is_some()
        {
            inner.record_check("cache", cache.as_ref(), id, &info).await;
        }

        if !info.healthy {
            warn!(tenant = %inner.tenant, blob_id = %id, message = %info.message, "blob check failed");
        }
        Ok(info)
    }

    async fn get_all_retentions(
        &self,
        callback: &mut RetentionCallback<'_>,
    ) -> Result<(), StorageError> {
        self.inner.primary.get_all_retentions(callback).await
    }

    async fn add_retention(&self, entry: &RetentionEntry) -> Result<(), StorageError> {
        let inner = &self.inner;
        inner.primary.add_retention(entry).await?;
        if let Some(retention) = &inner.retention {
            retention.remove(&entry.tenant_id, &entry.blob_id);
            if let Err(e) = retention.add_retention(entry.clone()) {
                warn!(tenant = %inner.tenant, blob_id = %entry.blob_id, error = %e, "failed to track retention");
            }
        }
        Ok(())
    }

    async fn get_retention(&self, id: &str) -> Result<RetentionEntry, StorageError> {
        self.inner.primary.get_retention(id).await
    }

    async fn delete_retention(&self, id: &str) -> Result<(), StorageError> {
        let inner = &self.inner;
        match &inner.retention {
            Some(retention) => retention.delete_retention(inner.primary.as_ref(), id).await,
            None => inner.primary.delete_retention(id).await,
        }
    }

    async fn reset_retention(&self, id: &str) -> Result<RetentionEntry, StorageError> {
        let inner = &self.inner;
        match &inner.retention {
            Some(retention) => retention.reset_retention(inner.primary.as_ref(), id).await,
            None => inner.primary.reset_retention(id).await,
        }
    }

    /// Wait for background work, then close the tiers owned by this gateway.
    async fn close(&self) -> Result<(), StorageError> {
        let inner = &self.inner;
        inner.tracker.close();
        inner.tracker.wait().await;
        for (kind, replica) in inner.replicas() {
            if let Err(e) = replica.close().await {
                warn!(tenant = %inner.tenant, tier = kind, error = %e, "replica tier failed to close");
            }
        }
        inner.primary.close().await?;
        info!(tenant = %inner.tenant, "storage gateway closed");
        Ok(())
    }
}
