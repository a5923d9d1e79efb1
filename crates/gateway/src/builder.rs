use std::sync::Arc;

use dashmap::DashSet;
use stratum_retention::RetentionManager;
use stratum_storage::BlobStorage;
use tokio_util::task::TaskTracker;

use crate::error::GatewayError;
use crate::gateway::{GatewayInner, StorageGateway};
use crate::index::BlobIndex;
use crate::metrics::GatewayMetrics;
use crate::tenant::TenantDirectory;

/// Fluent builder for constructing a [`StorageGateway`].
///
/// A tenant and a primary tier are required. Every other collaborator is
/// optional; replication defaults to asynchronous.
#[derive(Default)]
pub struct StorageGatewayBuilder {
    tenant: Option<String>,
    primary: Option<Arc<dyn BlobStorage>>,
    backup: Option<Arc<dyn BlobStorage>>,
    tenant_backup: Option<Arc<dyn BlobStorage>>,
    cache: Option<Arc<dyn BlobStorage>>,
    index: Option<Arc<dyn BlobIndex>>,
    retention: Option<Arc<RetentionManager>>,
    tenants: Option<Arc<dyn TenantDirectory>>,
    sync_mode: bool,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl StorageGatewayBuilder {
    /// Create a new builder with all optional fields unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenant whose blobs this gateway serves.
    #[must_use]
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// The system-of-record tier.
    #[must_use]
    pub fn primary(mut self, primary: Arc<dyn BlobStorage>) -> Self {
        self.primary = Some(primary);
        self
    }

    /// Backup tier receiving a copy of every write.
    #[must_use]
    pub fn backup(mut self, backup: Arc<dyn BlobStorage>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// A second backup tier configured for this tenant only.
    #[must_use]
    pub fn tenant_backup(mut self, backup: Arc<dyn BlobStorage>) -> Self {
        self.tenant_backup = Some(backup);
        self
    }

    /// A read-through cache, usually shared between tenants.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn BlobStorage>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Metadata index used for search.
    #[must_use]
    pub fn index(mut self, index: Arc<dyn BlobIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Retention manager that tracks blobs stored with a ttl.
    #[must_use]
    pub fn retention(mut self, retention: Arc<RetentionManager>) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Directory receiving storage size updates.
    #[must_use]
    pub fn tenants(mut self, tenants: Arc<dyn TenantDirectory>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    /// Replicate to backups before `store_blob` returns.
    #[must_use]
    pub fn sync_mode(mut self, sync: bool) -> Self {
        self.sync_mode = sync;
        self
    }

    /// Share a metrics instance, e.g. across all tenants of a factory.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consume the builder and produce a [`StorageGateway`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the tenant or the primary
    /// tier is missing.
    pub fn build(self) -> Result<StorageGateway, GatewayError> {
        let tenant = self
            .tenant
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Configuration("tenant is required".into()))?;
        let primary = self
            .primary
            .ok_or_else(|| GatewayError::Configuration("primary tier is required".into()))?;

        Ok(StorageGateway::from_inner(GatewayInner {
            tenant,
            primary,
            backup: self.backup,
            tenant_backup: self.tenant_backup,
            cache: self.cache,
            index: self.index,
            retention: self.retention,
            tenants: self.tenants,
            sync_mode: self.sync_mode,
            metrics: self.metrics.unwrap_or_default(),
            tracker: TaskTracker::new(),
            storing: Arc::new(DashSet::new()),
            restoring: Arc::new(DashSet::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_storage_memory::MemoryBlobStorage;

    #[test]
    fn build_missing_primary_returns_error() {
        let err = StorageGatewayBuilder::new().tenant("acme").build().unwrap_err();
        assert!(err.to_string().contains("primary tier is required"));
    }

    #[test]
    fn build_missing_tenant_returns_error() {
        let err = StorageGatewayBuilder::new()
            .primary(Arc::new(MemoryBlobStorage::new("acme")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("tenant is required"));
    }

    #[test]
    fn build_with_required_fields_succeeds() {
        let gateway = StorageGatewayBuilder::new()
            .tenant("acme")
            .primary(Arc::new(MemoryBlobStorage::new("acme")))
            .sync_mode(true)
            .build()
            .unwrap();
        assert_eq!(gateway.tenant(), "acme");
        assert!(gateway.sync_mode());
    }
}
