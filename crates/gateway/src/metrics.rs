use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking gateway outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Blobs written to the primary tier.
    pub stored: AtomicU64,
    /// Blobs deleted from the primary tier.
    pub deleted: AtomicU64,
    /// Reads served from the cache.
    pub cache_hits: AtomicU64,
    /// Reads served from the primary tier.
    pub primary_reads: AtomicU64,
    /// Reads that fell through to the backup tier.
    pub backup_reads: AtomicU64,
    /// Blobs copied back from the backup into the primary tier.
    pub restored: AtomicU64,
    /// Blobs copied into the cache.
    pub cache_populated: AtomicU64,
    /// Failed writes to a backup or tenant backup tier.
    pub replication_failures: AtomicU64,
}

impl GatewayMetrics {
    /// Increment the stored counter.
    pub fn increment_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the deleted counter.
    pub fn increment_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the cache hit counter.
    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the primary read counter.
    pub fn increment_primary_reads(&self) {
        self.primary_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the backup read counter.
    pub fn increment_backup_reads(&self) {
        self.backup_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the restored counter.
    pub fn increment_restored(&self) {
        self.restored.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the cache populated counter.
    pub fn increment_cache_populated(&self) {
        self.cache_populated.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the replication failure counter.
    pub fn increment_replication_failures(&self) {
        self.replication_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stored: self.stored.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            primary_reads: self.primary_reads.load(Ordering::Relaxed),
            backup_reads: self.backup_reads.load(Ordering::Relaxed),
            restored: self.restored.load(Ordering::Relaxed),
            cache_populated: self.cache_populated.load(Ordering::Relaxed),
            replication_failures: self.replication_failures.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`GatewayMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub stored: u64,
    pub deleted: u64,
    pub cache_hits: u64,
    pub primary_reads: u64,
    pub backup_reads: u64,
    pub restored: u64,
    pub cache_populated: u64,
    pub replication_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_zero() {
        assert_eq!(GatewayMetrics::default().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_and_snapshot() {
        let m = GatewayMetrics::default();
        m.increment_stored();
        m.increment_stored();
        m.increment_cache_hits();
        m.increment_replication_failures();

        let snap = m.snapshot();
        assert_eq!(snap.stored, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.replication_failures, 1);
        assert_eq!(snap.restored, 0);
    }
}
