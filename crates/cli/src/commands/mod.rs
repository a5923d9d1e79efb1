pub mod blob;
pub mod check;
pub mod sweep;

use std::sync::Arc;

use stratum_cache::CacheStorage;
use stratum_gateway::{MemoryTenantDirectory, StorageFactory};
use stratum_storage::BlobStorage;
use tracing::info;

use crate::config::StratumConfig;

/// Build the factory described by `config`, register its tenants and start it.
pub async fn open_factory(config: &StratumConfig) -> anyhow::Result<Arc<StorageFactory>> {
    let cache = config.cache.as_ref().map(|section| {
        let cache: Arc<dyn BlobStorage> = Arc::new(CacheStorage::new(section.to_cache_config()));
        cache
    });
    let factory = StorageFactory::new(
        config.storage.clone(),
        Arc::new(MemoryTenantDirectory::new()),
        cache,
        None,
        config.retention.to_retention_config(),
    );
    for tenant in &config.tenants {
        factory
            .create_tenant(&tenant.name, tenant.to_tenant_config())
            .await?;
    }
    factory.init().await?;
    info!(
        tenants = config.tenants.len(),
        cache = config.cache.is_some(),
        backup = config.storage.backup.is_some(),
        "storage opened"
    );
    Ok(factory)
}
