use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`CacheStorage`](crate::CacheStorage).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory the cache spools payload files into.
    pub path: PathBuf,
    /// Maximum number of cached entries (default: 10 000).
    pub max_count: usize,
    /// Maximum payload bytes held in memory across all entries (default: 256 MiB).
    pub max_ram_size: u64,
    /// Payloads smaller than this are also kept in memory (default: 1 MiB).
    pub ram_threshold: u64,
    /// How often a dirty existence filter is rebuilt (default: 60 seconds).
    pub filter_rebuild_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("stratum-cache"),
            max_count: 10_000,
            max_ram_size: 256 * 1024 * 1024,
            ram_threshold: 1024 * 1024,
            filter_rebuild_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Defaults with the spool directory set to `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}
