//! Tier orchestration: one logical [`BlobStorage`](stratum_storage::BlobStorage)
//! per tenant composed of a primary tier, optional backups, a shared cache,
//! an optional search index and the retention sweep.

pub mod builder;
pub mod config;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod index;
pub mod metrics;
pub mod tenant;

pub use builder::StorageGatewayBuilder;
pub use config::{StorageConfig, TierConfig};
pub use error::GatewayError;
pub use factory::StorageFactory;
pub use gateway::StorageGateway;
pub use index::{BlobIndex, MemoryIndex, SearchCallback};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use tenant::{MemoryTenantDirectory, TenantConfig, TenantDirectory};
