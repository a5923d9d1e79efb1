use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratum_storage::BlobStorage;
use stratum_storage_fs::FsBlobStorage;
use stratum_storage_memory::MemoryBlobStorage;

/// How to construct one physical tier for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TierConfig {
    /// Volatile in-process storage.
    Memory,
    /// Local filesystem storage rooted at `path`.
    Fs { path: PathBuf },
}

impl TierConfig {
    /// Construct the tier serving `tenant`. The caller runs `init`.
    pub fn build(&self, tenant: &str) -> Arc<dyn BlobStorage> {
        match self {
            Self::Memory => Arc::new(MemoryBlobStorage::new(tenant)),
            Self::Fs { path } => Arc::new(FsBlobStorage::new(path, tenant)),
        }
    }
}

/// Tier layout shared by every tenant's gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub primary: TierConfig,
    pub backup: Option<TierConfig>,
    /// Replicate to backup tiers before `store_blob` returns.
    pub sync_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary: TierConfig::Memory,
            backup: None,
            sync_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_config_uses_type_tag() {
        let tier: TierConfig = serde_json::from_str(r#"{"type":"fs","path":"/srv/blobs"}"#).unwrap();
        assert_eq!(
            tier,
            TierConfig::Fs {
                path: PathBuf::from("/srv/blobs")
            }
        );
        let tier: TierConfig = serde_json::from_str(r#"{"type":"memory"}"#).unwrap();
        assert_eq!(tier, TierConfig::Memory);
    }

    #[test]
    fn built_tier_serves_tenant() {
        let tier = TierConfig::Memory.build("acme");
        assert_eq!(tier.tenant(), "acme");
    }
}
