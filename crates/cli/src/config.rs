use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use stratum_cache::CacheConfig;
use stratum_gateway::{StorageConfig, TenantConfig, TierConfig};
use stratum_retention::RetentionConfig;

/// Top-level `stratum.toml`.
#[derive(Debug, Deserialize)]
pub struct StratumConfig {
    /// Tier layout shared by every tenant.
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
    /// Shared read cache. Disabled when the section is absent.
    #[serde(default)]
    pub cache: Option<CacheSection>,
    #[serde(default)]
    pub retention: RetentionSection,
    /// Tenants registered at startup.
    #[serde(default = "default_tenants")]
    pub tenants: Vec<TenantSection>,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            cache: None,
            retention: RetentionSection::default(),
            tenants: default_tenants(),
        }
    }
}

impl StratumConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.retention.tick_seconds > 0,
            "retention.tick_seconds must be at least 1"
        );
        if let Some(cache) = &self.cache {
            anyhow::ensure!(
                cache.filter_rebuild_seconds > 0,
                "cache.filter_rebuild_seconds must be at least 1"
            );
        }
        Ok(())
    }
}

/// The `[cache]` section.
#[derive(Debug, Deserialize)]
pub struct CacheSection {
    /// Spool directory for cached payloads.
    pub path: PathBuf,
    #[serde(default = "default_cache_max_count")]
    pub max_count: usize,
    /// Payload bytes held in memory across all entries.
    #[serde(default = "default_cache_max_ram_size")]
    pub max_ram_size: u64,
    /// Payloads below this size are also kept in memory.
    #[serde(default = "default_cache_ram_threshold")]
    pub ram_threshold: u64,
    /// Existence filter rebuild interval in seconds.
    #[serde(default = "default_filter_rebuild_seconds")]
    pub filter_rebuild_seconds: u64,
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            path: self.path.clone(),
            max_count: self.max_count,
            max_ram_size: self.max_ram_size,
            ram_threshold: self.ram_threshold,
            filter_rebuild_interval: Duration::from_secs(self.filter_rebuild_seconds),
        }
    }
}

/// The `[retention]` section.
#[derive(Debug, Deserialize)]
pub struct RetentionSection {
    /// Entries tracked in memory by the sweep.
    #[serde(default = "default_retention_max_size")]
    pub max_size: usize,
    /// Sweep interval in seconds.
    #[serde(default = "default_retention_tick_seconds")]
    pub tick_seconds: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            max_size: default_retention_max_size(),
            tick_seconds: default_retention_tick_seconds(),
        }
    }
}

impl RetentionSection {
    pub fn to_retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            max_size: self.max_size,
            tick_interval: Duration::from_secs(self.tick_seconds),
        }
    }
}

/// One `[[tenants]]` entry.
#[derive(Debug, Deserialize)]
pub struct TenantSection {
    pub name: String,
    /// Extra backup tier for this tenant only.
    #[serde(default)]
    pub backup: Option<TierConfig>,
}

impl TenantSection {
    pub fn to_tenant_config(&self) -> TenantConfig {
        TenantConfig {
            backup: self.backup.clone(),
        }
    }
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        primary: TierConfig::Fs {
            path: PathBuf::from("stratum-data/primary"),
        },
        backup: None,
        sync_mode: true,
    }
}

fn default_tenants() -> Vec<TenantSection> {
    vec![TenantSection {
        name: "default".to_owned(),
        backup: None,
    }]
}

fn default_cache_max_count() -> usize {
    10_000
}

fn default_cache_max_ram_size() -> u64 {
    256 * 1024 * 1024
}

fn default_cache_ram_threshold() -> u64 {
    1024 * 1024
}

fn default_filter_rebuild_seconds() -> u64 {
    60
}

fn default_retention_max_size() -> usize {
    10_000
}

fn default_retention_tick_seconds() -> u64 {
    60
}
