use serde_json::json;
use stratum_core::{BlobDescription, RetentionEntry, now_ms};

use crate::error::StorageError;
use crate::hash::digest_bytes;
use crate::store::{BlobStorage, list_blob_ids, list_retentions};

fn tenant_of(storage: &dyn BlobStorage) -> String {
    match storage.tenant() {
        "" => "conformance".to_owned(),
        t => t.to_owned(),
    }
}

fn test_desc(storage: &dyn BlobStorage, id: &str) -> BlobDescription {
    BlobDescription::new(tenant_of(storage), format!("{id}.txt"), "text/plain").with_id(id)
}

async fn read_back(storage: &dyn BlobStorage, id: &str) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::new();
    storage.retrieve_blob(id, &mut out).await?;
    Ok(out)
}

/// Run the blob lifecycle conformance test suite.
///
/// Call this from your tier's test module with a fresh, initialized instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_storage_conformance_tests(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    test_missing_blob(storage).await?;
    test_store_and_retrieve(storage).await?;
    test_generated_id(storage).await?;
    test_duplicate_rejected(storage).await?;
    test_length_mismatch_rolls_back(storage).await?;
    test_update_description(storage).await?;
    test_delete(storage).await?;
    test_list_stops_early(storage).await?;
    test_check_healthy(storage).await?;
    Ok(())
}

async fn test_missing_blob(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    assert!(!storage.has_blob("conf-missing").await?);
    let err = storage
        .get_blob_description("conf-missing")
        .await
        .expect_err("missing description should fail");
    assert!(err.is_not_found(), "expected NotFound, got {err}");
    let err = read_back(storage, "conf-missing")
        .await
        .expect_err("missing payload should fail");
    assert!(err.is_not_found(), "expected NotFound, got {err}");
    Ok(())
}

async fn test_store_and_retrieve(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let payload = b"conformance payload".to_vec();
    let mut desc = test_desc(storage, "conf-roundtrip")
        .with_property("labels", json!(["a", ["b", "c"]]))
        .with_property("owner", "conformance");
    let id = storage.store_blob(&mut desc, &mut &payload[..]).await?;
    assert_eq!(id, "conf-roundtrip");
    assert_eq!(desc.content_length, payload.len() as u64);
    assert_eq!(desc.hash, digest_bytes(&payload));
    assert!(desc.creation_date > 0, "creation date should be filled in");

    assert!(storage.has_blob(&id).await?);
    let stored = storage.get_blob_description(&id).await?;
    assert_eq!(stored.properties, desc.properties);
    assert_eq!(stored.hash, desc.hash);
    assert_eq!(stored.content_length, payload.len() as u64);
    assert_eq!(read_back(storage, &id).await?, payload);
    Ok(())
}

async fn test_generated_id(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = BlobDescription::new(tenant_of(storage), "anon.txt", "text/plain");
    let id = storage.store_blob(&mut desc, &mut &b"anon"[..]).await?;
    assert!(!id.is_empty(), "an id should be generated");
    assert_eq!(desc.blob_id, id);
    assert!(storage.has_blob(&id).await?);
    storage.delete_blob(&id).await?;
    Ok(())
}

async fn test_duplicate_rejected(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = test_desc(storage, "conf-dup");
    storage.store_blob(&mut desc, &mut &b"first"[..]).await?;

    let mut again = test_desc(storage, "conf-dup");
    let err = storage
        .store_blob(&mut again, &mut &b"second"[..])
        .await
        .expect_err("duplicate store should fail");
    assert!(err.is_already_exists(), "expected AlreadyExists, got {err}");
    assert_eq!(
        read_back(storage, "conf-dup").await?,
        b"first",
        "original content should remain"
    );
    Ok(())
}

async fn test_length_mismatch_rolls_back(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = test_desc(storage, "conf-short").with_content_length(100);
    let err = storage
        .store_blob(&mut desc, &mut &b"too short"[..])
        .await
        .expect_err("length mismatch should fail");
    assert!(
        matches!(err, StorageError::InvalidInput(_)),
        "expected InvalidInput, got {err}"
    );
    assert!(
        !storage.has_blob("conf-short").await?,
        "partial content should be removed"
    );
    Ok(())
}

async fn test_update_description(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = test_desc(storage, "conf-update");
    storage.store_blob(&mut desc, &mut &b"update me"[..]).await?;

    let mut changed = desc.clone();
    changed.filename = "renamed.txt".into();
    changed.hash = "sha-256:bogus".into();
    changed.properties.insert("state".into(), json!("reviewed"));
    storage.update_blob_description("conf-update", &changed).await?;

    let stored = storage.get_blob_description("conf-update").await?;
    assert_eq!(stored.filename, "renamed.txt");
    assert_eq!(stored.properties.get("state"), Some(&json!("reviewed")));
    assert_eq!(stored.hash, desc.hash, "content hash must not change");
    assert_eq!(read_back(storage, "conf-update").await?, b"update me");

    let err = storage
        .update_blob_description("conf-update-missing", &changed)
        .await
        .expect_err("update of a missing blob should fail");
    assert!(err.is_not_found(), "expected NotFound, got {err}");
    Ok(())
}

async fn test_delete(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = test_desc(storage, "conf-delete");
    storage.store_blob(&mut desc, &mut &b"bye"[..]).await?;
    storage.delete_blob("conf-delete").await?;
    assert!(!storage.has_blob("conf-delete").await?);

    let err = storage
        .delete_blob("conf-delete")
        .await
        .expect_err("second delete should fail");
    assert!(err.is_not_found(), "expected NotFound, got {err}");
    Ok(())
}

async fn test_list_stops_early(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    for i in 0..3 {
        let mut desc = test_desc(storage, &format!("conf-list-{i}"));
        storage.store_blob(&mut desc, &mut &b"x"[..]).await?;
    }
    let all = list_blob_ids(storage).await?;
    for i in 0..3 {
        assert!(all.contains(&format!("conf-list-{i}")));
    }

    let mut seen = 0;
    storage
        .list_blobs(&mut |_: &str| {
            seen += 1;
            false
        })
        .await?;
    assert_eq!(seen, 1, "listing should stop when the callback returns false");
    Ok(())
}

async fn test_check_healthy(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = test_desc(storage, "conf-check");
    storage.store_blob(&mut desc, &mut &b"check me"[..]).await?;
    let info = storage.check_blob("conf-check").await?;
    assert!(info.healthy, "fresh blob should be healthy: {}", info.message);

    let stored = storage.get_blob_description("conf-check").await?;
    assert_eq!(stored.check.as_ref().map(|c| c.healthy), Some(true));
    Ok(())
}

/// Run the retention sub-interface conformance test suite.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_retention_conformance_tests(
    storage: &dyn BlobStorage,
) -> Result<(), StorageError> {
    test_retention_persisted_on_store(storage).await?;
    test_retention_crud(storage).await?;
    test_retention_reset(storage).await?;
    test_retention_removed_with_blob(storage).await?;
    Ok(())
}

async fn test_retention_persisted_on_store(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = test_desc(storage, "ret-store").with_retention(10);
    storage.store_blob(&mut desc, &mut &b"ttl"[..]).await?;
    let entry = storage.get_retention("ret-store").await?;
    assert_eq!(entry.retention, 10);
    assert_eq!(entry.creation_date, desc.creation_date);

    let mut plain = test_desc(storage, "ret-none");
    storage.store_blob(&mut plain, &mut &b"no ttl"[..]).await?;
    let err = storage
        .get_retention("ret-none")
        .await
        .expect_err("blob without ttl has no retention entry");
    assert!(err.is_not_found(), "expected NotFound, got {err}");
    Ok(())
}

async fn test_retention_crud(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let entry = RetentionEntry {
        blob_id: "ret-crud".into(),
        tenant_id: tenant_of(storage),
        filename: "crud.txt".into(),
        creation_date: 1_000,
        retention: 1,
        retention_base: 0,
    };
    storage.add_retention(&entry).await?;
    assert_eq!(storage.get_retention("ret-crud").await?, entry);

    let all = list_retentions(storage).await?;
    assert!(all.iter().any(|e| e.blob_id == "ret-crud"));

    storage.delete_retention("ret-crud").await?;
    let err = storage
        .get_retention("ret-crud")
        .await
        .expect_err("deleted retention should be gone");
    assert!(err.is_not_found(), "expected NotFound, got {err}");
    Ok(())
}

async fn test_retention_reset(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let entry = RetentionEntry {
        blob_id: "ret-reset".into(),
        tenant_id: tenant_of(storage),
        filename: "reset.txt".into(),
        creation_date: 1_000,
        retention: 1,
        retention_base: 0,
    };
    storage.add_retention(&entry).await?;
    let before = now_ms();
    let reset = storage.reset_retention("ret-reset").await?;
    assert!(reset.retention_base >= before, "base should move to now");
    assert_eq!(storage.get_retention("ret-reset").await?, reset);
    storage.delete_retention("ret-reset").await?;
    Ok(())
}

async fn test_retention_removed_with_blob(storage: &dyn BlobStorage) -> Result<(), StorageError> {
    let mut desc = test_desc(storage, "ret-delete").with_retention(5);
    storage.store_blob(&mut desc, &mut &b"ttl"[..]).await?;
    storage.delete_blob("ret-delete").await?;
    let err = storage
        .get_retention("ret-delete")
        .await
        .expect_err("retention should go with the blob");
    assert!(err.is_not_found(), "expected NotFound, got {err}");
    Ok(())
}
