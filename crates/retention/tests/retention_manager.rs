use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stratum_core::{BlobDescription, MINUTE_MS, RetentionEntry, now_ms};
use stratum_retention::{RetentionConfig, RetentionManager, RetentionState, TenantStorageResolver};
use stratum_storage::{BlobStorage, StorageError};
use stratum_storage_memory::MemoryBlobStorage;

/// Fixed set of in-memory tenants; `broken` tenants fail to resolve.
struct Tenants {
    storages: HashMap<String, Arc<MemoryBlobStorage>>,
    broken: Vec<String>,
}

impl Tenants {
    fn new(names: &[&str]) -> Arc<Self> {
        Self::with_broken(names, &[])
    }

    fn with_broken(names: &[&str], broken: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            storages: names
                .iter()
                .map(|n| ((*n).to_owned(), Arc::new(MemoryBlobStorage::new(*n))))
                .collect(),
            broken: broken.iter().map(|n| (*n).to_owned()).collect(),
        })
    }

    fn storage(&self, tenant: &str) -> &MemoryBlobStorage {
        &self.storages[tenant]
    }
}

#[async_trait]
impl TenantStorageResolver for Tenants {
    async fn tenants(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self.storages.keys().cloned().collect();
        names.extend(self.broken.iter().cloned());
        Ok(names)
    }

    async fn storage_for(&self, tenant: &str) -> Result<Arc<dyn BlobStorage>, StorageError> {
        self.storages
            .get(tenant)
            .map(|s| Arc::clone(s) as Arc<dyn BlobStorage>)
            .ok_or_else(|| StorageError::DependencyUnavailable(format!("tenant {tenant}")))
    }
}

fn manager(tenants: &Arc<Tenants>, config: RetentionConfig) -> Arc<RetentionManager> {
    let resolver: Arc<dyn TenantStorageResolver> = Arc::clone(tenants) as _;
    Arc::new(RetentionManager::new(config, Arc::downgrade(&resolver)))
}

/// Store a blob created `age_min` minutes ago with a ttl of `ttl_min` minutes.
async fn store_aged(storage: &MemoryBlobStorage, id: &str, age_min: i64, ttl_min: u64) -> i64 {
    let mut desc = BlobDescription::new(storage.tenant(), format!("{id}.txt"), "text/plain")
        .with_id(id)
        .with_retention(ttl_min);
    desc.creation_date = now_ms() - age_min * MINUTE_MS;
    storage.store_blob(&mut desc, &mut &b"payload"[..]).await.unwrap();
    desc.creation_date
}

fn entry(id: &str, creation_date: i64, retention: u64) -> RetentionEntry {
    RetentionEntry {
        blob_id: id.into(),
        tenant_id: "acme".into(),
        filename: format!("{id}.txt"),
        creation_date,
        retention,
        retention_base: 0,
    }
}

#[tokio::test]
async fn init_loads_all_tenants_sorted_and_capped() {
    let tenants = Tenants::new(&["acme", "globex"]);
    store_aged(tenants.storage("acme"), "a-late", 0, 30).await;
    store_aged(tenants.storage("acme"), "a-soon", 0, 5).await;
    store_aged(tenants.storage("globex"), "g-mid", 0, 10).await;
    store_aged(tenants.storage("globex"), "g-latest", 0, 60).await;

    let manager = manager(
        &tenants,
        RetentionConfig {
            max_size: 3,
            ..RetentionConfig::default()
        },
    );
    assert_eq!(manager.state(), RetentionState::Uninitialized);
    manager.init().await.unwrap();
    assert_eq!(manager.state(), RetentionState::Running);

    let ids: Vec<String> = manager.entries().into_iter().map(|e| e.blob_id).collect();
    assert_eq!(ids, vec!["a-soon", "g-mid", "a-late"]);
    manager.close().await;
}

#[tokio::test]
async fn add_keeps_order_rejects_duplicates_and_respects_capacity() {
    let tenants = Tenants::new(&["acme"]);
    let manager = manager(
        &tenants,
        RetentionConfig {
            max_size: 3,
            ..RetentionConfig::default()
        },
    );

    assert!(manager.add_retention(entry("ten", 0, 10)).unwrap());
    assert!(manager.add_retention(entry("thirty", 0, 30)).unwrap());
    assert!(manager.add_retention(entry("twenty", 0, 20)).unwrap());

    let err = manager.add_retention(entry("ten", 0, 99)).unwrap_err();
    assert!(err.is_already_exists());

    // Full list: a later expiry is not tracked, an earlier one pushes out the tail.
    assert!(!manager.add_retention(entry("forty", 0, 40)).unwrap());
    assert!(manager.add_retention(entry("five", 0, 5)).unwrap());

    let ids: Vec<String> = manager.entries().into_iter().map(|e| e.blob_id).collect();
    assert_eq!(ids, vec!["five", "ten", "twenty"]);
}

#[tokio::test]
async fn same_id_in_two_tenants_is_tracked_separately() {
    let tenants = Tenants::new(&["acme", "globex"]);
    store_aged(tenants.storage("acme"), "x", 0, 10).await;
    store_aged(tenants.storage("globex"), "x", 20, 10).await;
    let manager = manager(&tenants, RetentionConfig::default());

    manager.refresh().await;
    assert_eq!(manager.len(), 2);

    let globex_entry = RetentionEntry {
        tenant_id: "globex".into(),
        ..entry("y", now_ms(), 10)
    };
    assert!(manager.add_retention(entry("y", now_ms(), 10)).unwrap());
    assert!(manager.add_retention(globex_entry).unwrap());
    assert!(manager.remove("acme", "y"));
    assert!(!manager.remove("acme", "y"));
    let left: Vec<(String, String)> = manager
        .entries()
        .into_iter()
        .map(|e| (e.tenant_id, e.blob_id))
        .collect();
    assert!(left.contains(&("globex".into(), "y".into())));

    // The globex copy expired ten minutes ago; the acme copy has not.
    assert_eq!(manager.sweep_expired(now_ms()).await, 1);
    assert!(!tenants.storage("globex").has_blob("x").await.unwrap());
    assert!(tenants.storage("acme").has_blob("x").await.unwrap());
}

#[tokio::test]
async fn sweep_never_deletes_before_expiry() {
    let tenants = Tenants::new(&["acme"]);
    let created = store_aged(tenants.storage("acme"), "ttl", 0, 2).await;
    let manager = manager(&tenants, RetentionConfig::default());
    manager.refresh().await;

    let expires = created + 2 * MINUTE_MS;
    assert_eq!(manager.sweep_expired(expires - 1).await, 0);
    assert!(tenants.storage("acme").has_blob("ttl").await.unwrap());

    assert_eq!(manager.sweep_expired(expires).await, 1);
    assert!(!tenants.storage("acme").has_blob("ttl").await.unwrap());
    assert!(manager.is_empty());
}

#[tokio::test]
async fn tick_deletes_expired_and_keeps_the_rest() {
    let tenants = Tenants::new(&["acme", "globex"]);
    store_aged(tenants.storage("acme"), "old", 10, 1).await;
    store_aged(tenants.storage("globex"), "older", 60, 30).await;
    store_aged(tenants.storage("acme"), "fresh", 0, 60).await;

    let manager = manager(&tenants, RetentionConfig::default());
    manager.refresh().await;
    assert_eq!(manager.len(), 3);

    manager.tick().await;
    assert!(!tenants.storage("acme").has_blob("old").await.unwrap());
    assert!(!tenants.storage("globex").has_blob("older").await.unwrap());
    assert!(tenants.storage("acme").has_blob("fresh").await.unwrap());

    let ids: Vec<String> = manager.entries().into_iter().map(|e| e.blob_id).collect();
    assert_eq!(ids, vec!["fresh"]);
}

#[tokio::test]
async fn broken_tenant_is_skipped() {
    let tenants = Tenants::with_broken(&["acme"], &["ghost"]);
    store_aged(tenants.storage("acme"), "old", 10, 1).await;

    let manager = manager(&tenants, RetentionConfig::default());
    manager.refresh().await;
    assert_eq!(manager.len(), 1);

    // An entry for a tenant that cannot be resolved stays tracked.
    let mut ghost = entry("ghost-blob", 0, 1);
    ghost.tenant_id = "ghost".into();
    manager.add_retention(ghost).unwrap();

    assert_eq!(manager.sweep_expired(now_ms()).await, 1);
    let ids: Vec<String> = manager.entries().into_iter().map(|e| e.blob_id).collect();
    assert_eq!(ids, vec!["ghost-blob"]);
}

#[tokio::test]
async fn reset_moves_entry_to_new_expiry() {
    let tenants = Tenants::new(&["acme"]);
    store_aged(tenants.storage("acme"), "reset-me", 50, 60).await;
    store_aged(tenants.storage("acme"), "other", 0, 30).await;

    let manager = manager(&tenants, RetentionConfig::default());
    manager.refresh().await;
    let ids: Vec<String> = manager.entries().into_iter().map(|e| e.blob_id).collect();
    assert_eq!(ids, vec!["reset-me", "other"]);

    let before = now_ms();
    let reset = manager
        .reset_retention(tenants.storage("acme"), "reset-me")
        .await
        .unwrap();
    assert!(reset.retention_base >= before);
    assert_eq!(
        tenants.storage("acme").get_retention("reset-me").await.unwrap(),
        reset
    );

    let ids: Vec<String> = manager.entries().into_iter().map(|e| e.blob_id).collect();
    assert_eq!(ids, vec!["other", "reset-me"]);
}

#[tokio::test]
async fn delete_retention_removes_persisted_and_tracked() {
    let tenants = Tenants::new(&["acme"]);
    store_aged(tenants.storage("acme"), "keep-forever", 0, 5).await;
    let manager = manager(&tenants, RetentionConfig::default());
    manager.refresh().await;

    manager
        .delete_retention(tenants.storage("acme"), "keep-forever")
        .await
        .unwrap();
    assert!(manager.is_empty());
    assert!(
        tenants
            .storage("acme")
            .get_retention("keep-forever")
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(tenants.storage("acme").has_blob("keep-forever").await.unwrap());
}

#[tokio::test]
async fn periodic_task_sweeps_and_close_is_idempotent() {
    let tenants = Tenants::new(&["acme"]);
    let manager = manager(
        &tenants,
        RetentionConfig {
            tick_interval: Duration::from_millis(20),
            ..RetentionConfig::default()
        },
    );
    manager.init().await.unwrap();

    // Registered after init, already expired.
    store_aged(tenants.storage("acme"), "stale", 5, 1).await;
    let stale = tenants.storage("acme").get_retention("stale").await.unwrap();
    manager.add_retention(stale).unwrap();

    for _ in 0..100 {
        if !tenants.storage("acme").has_blob("stale").await.unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!tenants.storage("acme").has_blob("stale").await.unwrap());

    manager.close().await;
    assert_eq!(manager.state(), RetentionState::Stopped);
    manager.close().await;
    assert_eq!(manager.state(), RetentionState::Stopped);

    // Stopped managers do not restart.
    manager.init().await.unwrap();
    assert_eq!(manager.state(), RetentionState::Stopped);
}

#[tokio::test]
async fn zero_tick_interval_is_rejected() {
    let tenants = Tenants::new(&["acme"]);
    let manager = manager(
        &tenants,
        RetentionConfig {
            tick_interval: Duration::ZERO,
            ..RetentionConfig::default()
        },
    );
    let err = manager.init().await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)), "unexpected error: {err}");
    assert_eq!(manager.state(), RetentionState::Uninitialized);
}
