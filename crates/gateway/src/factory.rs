use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use stratum_retention::{RetentionConfig, RetentionManager, TenantStorageResolver};
use stratum_storage::{BlobStorage, StorageError};

use crate::builder::StorageGatewayBuilder;
use crate::config::StorageConfig;
use crate::gateway::StorageGateway;
use crate::index::BlobIndex;
use crate::metrics::GatewayMetrics;
use crate::tenant::{TenantConfig, TenantDirectory};

/// Owns one [`StorageGateway`] per tenant plus the collaborators they share.
///
/// Gateways are built lazily from the [`StorageConfig`] the first time a
/// tenant is requested. The factory also resolves tenants for its own
/// [`RetentionManager`], so expired blobs are deleted through the gateway
/// and leave every tier.
pub struct StorageFactory {
    config: StorageConfig,
    tenants: Arc<dyn TenantDirectory>,
    cache: Option<Arc<dyn BlobStorage>>,
    index: Option<Arc<dyn BlobIndex>>,
    retention: Arc<RetentionManager>,
    metrics: Arc<GatewayMetrics>,
    gateways: DashMap<String, Arc<StorageGateway>>,
}

impl std::fmt::Debug for StorageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageFactory")
            .field("config", &self.config)
            .field("gateways", &self.gateways.len())
            .finish_non_exhaustive()
    }
}

impl StorageFactory {
    pub fn new(
        config: StorageConfig,
        tenants: Arc<dyn TenantDirectory>,
        cache: Option<Arc<dyn BlobStorage>>,
        index: Option<Arc<dyn BlobIndex>>,
        retention: RetentionConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|factory: &Weak<Self>| {
            let resolver: Weak<dyn TenantStorageResolver> = factory.clone();
            Self {
                config,
                tenants,
                cache,
                index,
                retention: Arc::new(RetentionManager::new(retention, resolver)),
                metrics: Arc::new(GatewayMetrics::default()),
                gateways: DashMap::new(),
            }
        })
    }

    /// Initialize the shared cache and index, then start the retention sweep.
    pub async fn init(&self) -> Result<(), StorageError> {
        if let Some(cache) = &self.cache {
            cache.init().await?;
        }
        if let Some(index) = &self.index {
            index.init().await?;
        }
        self.retention.init().await?;
        info!(tenants = self.tenants.list_tenants().await?.len(), "storage factory ready");
        Ok(())
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    pub fn tenant_directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.tenants
    }

    /// Metrics aggregated over every tenant's gateway.
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Register a tenant with the directory.
    pub async fn create_tenant(&self, tenant: &str, config: TenantConfig) -> Result<(), StorageError> {
        self.tenants.add_tenant(tenant, config).await?;
        info!(tenant = %tenant, "tenant created");
        Ok(())
    }

    /// The gateway serving `tenant`, built on first use.
    pub async fn gateway(&self, tenant: &str) -> Result<Arc<StorageGateway>, StorageError> {
        if let Some(gateway) = self.gateways.get(tenant) {
            return Ok(Arc::clone(gateway.value()));
        }
        if !self.tenants.has_tenant(tenant).await? {
            return Err(StorageError::NotFound(format!("tenant {tenant}")));
        }
        let tenant_config = self.tenants.get_config(tenant).await?;

        let mut builder = StorageGatewayBuilder::new()
            .tenant(tenant)
            .primary(self.config.primary.build(tenant))
            .sync_mode(self.config.sync_mode)
            .retention(Arc::clone(&self.retention))
            .tenants(Arc::clone(&self.tenants))
            .metrics(Arc::clone(&self.metrics));
        if let Some(backup) = &self.config.backup {
            builder = builder.backup(backup.build(tenant));
        }
        if let Some(backup) = &tenant_config.backup {
            builder = builder.tenant_backup(backup.build(tenant));
        }
        if let Some(cache) = &self.cache {
            builder = builder.cache(Arc::clone(cache));
        }
        if let Some(index) = &self.index {
            builder = builder.index(Arc::clone(index));
        }
        let gateway = Arc::new(builder.build()?);
        gateway.init().await?;

        // A concurrent caller may have won the race; keep the first gateway.
        let gateway = Arc::clone(
            self.gateways
                .entry(tenant.to_owned())
                .or_insert(gateway)
                .value(),
        );
        Ok(gateway)
    }

    /// Stop the sweep, drain and close every gateway, then the shared parts.
    pub async fn close(&self) {
        self.retention.close().await;

        let gateways: Vec<Arc<StorageGateway>> =
            self.gateways.iter().map(|g| Arc::clone(g.value())).collect();
        for gateway in gateways {
            if let Err(e) = gateway.close().await {
                warn!(tenant = %gateway.tenant(), error = %e, "gateway failed to close");
            }
        }
        if let Some(cache) = &self.cache
            && let Err(e) = cache.close().await
        {
            warn!(error = %e, "cache failed to close");
        }
        if let Some(index) = &self.index
            && let Err(e) = index.close().await
        {
            warn!(error = %e, "index failed to close");
        }
        info!("storage factory closed");
    }
}

#[async_trait]
impl TenantStorageResolver for StorageFactory {
    async fn tenants(&self) -> Result<Vec<String>, StorageError> {
        self.tenants.list_tenants().await
    }

    async fn storage_for(&self, tenant: &str) -> Result<Arc<dyn BlobStorage>, StorageError> {
        let gateway: Arc<dyn BlobStorage> = self.gateway(tenant).await?;
        Ok(gateway)
    }
}
