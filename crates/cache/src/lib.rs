//! Bounded, Bloom-filter-accelerated LRU cache tier.
//!
//! [`CacheStorage`] implements [`stratum_storage::BlobStorage`] so the
//! orchestrator can treat it like any other tier. It is lossy: entries are
//! evicted by count, in-memory payloads are dropped under RAM pressure, and
//! nothing survives a restart.

pub mod config;
pub mod filter;
mod lru;
mod store;

pub use config::CacheConfig;
pub use filter::BloomFilter;
pub use store::{CacheStats, CacheStorage};
