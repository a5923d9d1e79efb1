use stratum_core::BlobDescription;
use stratum_storage::testing::{run_retention_conformance_tests, run_storage_conformance_tests};
use stratum_storage::{BlobStorage, list_blob_ids};
use stratum_storage_fs::FsBlobStorage;

async fn fresh(root: &std::path::Path, tenant: &str) -> FsBlobStorage {
    let storage = FsBlobStorage::new(root, tenant);
    storage.init().await.unwrap();
    storage
}

#[tokio::test]
async fn passes_storage_conformance() {
    let dir = tempfile::tempdir().unwrap();
    let storage = fresh(dir.path(), "conformance").await;
    run_storage_conformance_tests(&storage).await.unwrap();
}

#[tokio::test]
async fn passes_retention_conformance() {
    let dir = tempfile::tempdir().unwrap();
    let storage = fresh(dir.path(), "conformance").await;
    run_retention_conformance_tests(&storage).await.unwrap();
}

#[tokio::test]
async fn blobs_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = fresh(dir.path(), "acme").await;
        let mut desc = BlobDescription::new("acme", "a.txt", "text/plain")
            .with_id("persist")
            .with_retention(3);
        storage.store_blob(&mut desc, &mut &b"durable"[..]).await.unwrap();
    }

    let reopened = fresh(dir.path(), "acme").await;
    assert_eq!(list_blob_ids(&reopened).await.unwrap(), vec!["persist".to_owned()]);
    let mut out = Vec::new();
    reopened.retrieve_blob("persist", &mut out).await.unwrap();
    assert_eq!(out, b"durable");
    assert_eq!(reopened.get_retention("persist").await.unwrap().retention, 3);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let a = fresh(dir.path(), "a").await;
    let b = fresh(dir.path(), "b").await;
    let mut desc = BlobDescription::new("a", "x.txt", "text/plain").with_id("shared-id");
    a.store_blob(&mut desc, &mut &b"only in a"[..]).await.unwrap();

    assert!(a.has_blob("shared-id").await.unwrap());
    assert!(!b.has_blob("shared-id").await.unwrap());
}

#[tokio::test]
async fn concurrent_description_writes_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let storage = fresh(dir.path(), "acme").await;
    let mut desc = BlobDescription::new("acme", "c.txt", "text/plain").with_id("contended");
    storage.store_blob(&mut desc, &mut &b"payload"[..]).await.unwrap();

    for round in 0..20 {
        let mut renamed = desc.clone();
        renamed.filename = format!("c-{round}.txt");
        let (updated, checked) = tokio::join!(
            storage.update_blob_description("contended", &renamed),
            storage.check_blob("contended"),
        );
        updated.unwrap();
        assert!(checked.unwrap().healthy);
    }

    let leftovers = std::fs::read_dir(storage.blob_dir())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .is_ok_and(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn corrupted_file_fails_check() {
    let dir = tempfile::tempdir().unwrap();
    let storage = fresh(dir.path(), "acme").await;
    let mut desc = BlobDescription::new("acme", "c.txt", "text/plain").with_id("corrupt");
    storage.store_blob(&mut desc, &mut &b"pristine"[..]).await.unwrap();

    tokio::fs::write(storage.content_path("corrupt"), b"tampered").await.unwrap();
    let info = storage.check_blob("corrupt").await.unwrap();
    assert!(!info.healthy);
    assert!(info.message.contains("hash mismatch"), "{}", info.message);

    let stored = storage.get_blob_description("corrupt").await.unwrap();
    assert_eq!(stored.check.map(|c| c.healthy), Some(false));
}

#[tokio::test]
async fn missing_content_file_fails_check() {
    let dir = tempfile::tempdir().unwrap();
    let storage = fresh(dir.path(), "acme").await;
    let mut desc = BlobDescription::new("acme", "m.txt", "text/plain").with_id("gone");
    storage.store_blob(&mut desc, &mut &b"soon gone"[..]).await.unwrap();

    tokio::fs::remove_file(storage.content_path("gone")).await.unwrap();
    let info = storage.check_blob("gone").await.unwrap();
    assert!(!info.healthy);
    assert!(info.message.contains("missing"));
}

#[tokio::test]
async fn path_like_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let storage = fresh(dir.path(), "acme").await;
    let mut desc = BlobDescription::new("acme", "evil.txt", "text/plain").with_id("../escape");
    let err = storage
        .store_blob(&mut desc, &mut &b"nope"[..])
        .await
        .expect_err("path-like id must be rejected");
    assert!(matches!(err, stratum_storage::StorageError::InvalidInput(_)));
    assert!(!storage.has_blob("../escape").await.unwrap());
}
