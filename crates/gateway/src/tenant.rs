//! Tenant registry consumed by the factory and the gateway.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use stratum_storage::StorageError;

use crate::config::TierConfig;

/// Per-tenant settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Extra backup tier owned by this tenant alone.
    pub backup: Option<TierConfig>,
}

/// Directory of known tenants.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn has_tenant(&self, tenant: &str) -> Result<bool, StorageError>;

    /// Register a tenant. Fails with `AlreadyExists` for a known tenant.
    async fn add_tenant(&self, tenant: &str, config: TenantConfig) -> Result<(), StorageError>;

    async fn get_config(&self, tenant: &str) -> Result<TenantConfig, StorageError>;

    /// Account `bytes` of new content to the tenant.
    async fn add_size(&self, tenant: &str, bytes: u64) -> Result<(), StorageError>;

    /// Release `bytes` of deleted content. Saturates at zero.
    async fn sub_size(&self, tenant: &str, bytes: u64) -> Result<(), StorageError>;

    async fn list_tenants(&self) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Clone, Default)]
struct TenantRecord {
    config: TenantConfig,
    size: u64,
}

/// In-memory [`TenantDirectory`].
#[derive(Debug, Default)]
pub struct MemoryTenantDirectory {
    tenants: DashMap<String, TenantRecord>,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes accounted to `tenant`.
    pub fn size(&self, tenant: &str) -> Option<u64> {
        self.tenants.get(tenant).map(|r| r.size)
    }

    fn unknown(tenant: &str) -> StorageError {
        StorageError::NotFound(format!("tenant {tenant}"))
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn has_tenant(&self, tenant: &str) -> Result<bool, StorageError> {
        Ok(self.tenants.contains_key(tenant))
    }

    async fn add_tenant(&self, tenant: &str, config: TenantConfig) -> Result<(), StorageError> {
        match self.tenants.entry(tenant.to_owned()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(format!("tenant {tenant}"))),
            Entry::Vacant(slot) => {
                slot.insert(TenantRecord { config, size: 0 });
                Ok(())
            }
        }
    }

    async fn get_config(&self, tenant: &str) -> Result<TenantConfig, StorageError> {
        self.tenants
            .get(tenant)
            .map(|r| r.config.clone())
            .ok_or_else(|| Self::unknown(tenant))
    }

    async fn add_size(&self, tenant: &str, bytes: u64) -> Result<(), StorageError> {
        let mut record = self.tenants.get_mut(tenant).ok_or_else(|| Self::unknown(tenant))?;
        record.size = record.size.saturating_add(bytes);
        Ok(())
    }

    async fn sub_size(&self, tenant: &str, bytes: u64) -> Result<(), StorageError> {
        let mut record = self.tenants.get_mut(tenant).ok_or_else(|| Self::unknown(tenant))?;
        record.size = record.size.saturating_sub(bytes);
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self.tenants.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_tenants_once() {
        let dir = MemoryTenantDirectory::new();
        dir.add_tenant("acme", TenantConfig::default()).await.unwrap();
        assert!(dir.has_tenant("acme").await.unwrap());
        let err = dir.add_tenant("acme", TenantConfig::default()).await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(dir.get_config("nobody").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn size_accounting_saturates() {
        let dir = MemoryTenantDirectory::new();
        dir.add_tenant("acme", TenantConfig::default()).await.unwrap();
        dir.add_size("acme", 10).await.unwrap();
        dir.sub_size("acme", 4).await.unwrap();
        assert_eq!(dir.size("acme"), Some(6));
        dir.sub_size("acme", 100).await.unwrap();
        assert_eq!(dir.size("acme"), Some(0));
        assert!(dir.add_size("ghost", 1).await.is_err());
    }

    #[tokio::test]
    async fn lists_tenants_sorted() {
        let dir = MemoryTenantDirectory::new();
        for t in ["zeta", "alpha", "mid"] {
            dir.add_tenant(t, TenantConfig::default()).await.unwrap();
        }
        assert_eq!(dir.list_tenants().await.unwrap(), vec!["alpha", "mid", "zeta"]);
    }
}
