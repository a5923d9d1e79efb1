use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use stratum_core::{BlobDescription, CheckInfo, RetentionEntry, now_ms};
use stratum_storage::{
    BlobStorage, HashingReader, ListCallback, PayloadReader, PayloadWriter, RetentionCallback,
    StorageError, digest_bytes,
};

/// A stored blob: its description plus the full payload.
#[derive(Debug, Clone)]
struct StoredBlob {
    desc: BlobDescription,
    data: Bytes,
}

/// In-memory [`BlobStorage`] tier backed by [`DashMap`]s.
///
/// Holds whole payloads in memory, so it suits tests and small deployments.
/// Every instance serves exactly one tenant.
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    tenant: String,
    blobs: DashMap<String, StoredBlob>,
    retentions: DashMap<String, RetentionEntry>,
}

impl MemoryBlobStorage {
    /// Create an empty tier for `tenant`.
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the tier holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Replace the stored bytes of a blob without touching its description.
    ///
    /// Simulates silent corruption for integrity tests. Returns `false` when
    /// the blob does not exist.
    pub fn overwrite_content(&self, id: &str, data: impl Into<Bytes>) -> bool {
        match self.blobs.get_mut(id) {
            Some(mut blob) => {
                blob.data = data.into();
                true
            }
            None => false,
        }
    }

    fn not_found(&self, id: &str) -> StorageError {
        StorageError::NotFound(format!("blob {id} in tenant {}", self.tenant))
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    fn tenant(&self) -> &str {
        &self.tenant
    }

    async fn list_blobs(&self, callback: &mut ListCallback<'_>) -> Result<(), StorageError> {
        // Snapshot the keys so no shard lock is held while the callback runs.
        let ids: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            if !callback(id) {
                break;
            }
        }
        Ok(())
    }

    async fn store_blob(
        &self,
        desc: &mut BlobDescription,
        payload: &mut PayloadReader<'_>,
    ) -> Result<String, StorageError> {
        let id = desc.ensure_id().to_owned();
        if self.blobs.contains_key(&id) {
            return Err(StorageError::AlreadyExists(id));
        }

        let mut reader = HashingReader::new(payload);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        let (hash, len) = reader.finish();

        if desc.content_length > 0 && desc.content_length != len {
            return Err(StorageError::InvalidInput(format!(
                "blob {id}: declared {} bytes, received {len}",
                desc.content_length
            )));
        }

        if desc.tenant_id.is_empty() {
            desc.tenant_id.clone_from(&self.tenant);
        }
        desc.content_length = len;
        desc.hash = hash;
        desc.ensure_timestamps(now_ms());

        match self.blobs.entry(id.clone()) {
            Entry::Occupied(_) => return Err(StorageError::AlreadyExists(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(StoredBlob {
                    desc: desc.clone(),
                    data: Bytes::from(buf),
                });
            }
        }
        if let Some(entry) = desc.retention_entry() {
            self.retentions.insert(id.clone(), entry);
        }
        Ok(id)
    }

    async fn has_blob(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.contains_key(id))
    }

    async fn get_blob_description(&self, id: &str) -> Result<BlobDescription, StorageError> {
        self.blobs
            .get(id)
            .map(|b| b.desc.clone())
            .ok_or_else(|| self.not_found(id))
    }

    async fn update_blob_description(
        &self,
        id: &str,
        desc: &BlobDescription,
    ) -> Result<(), StorageError> {
        let mut blob = self.blobs.get_mut(id).ok_or_else(|| self.not_found(id))?;
        let mut updated = desc.clone();
        updated.blob_id = id.to_owned();
        updated.keep_content_fields(&blob.desc);
        blob.desc = updated;
        Ok(())
    }

    async fn retrieve_blob(
        &self,
        id: &str,
        sink: &mut PayloadWriter<'_>,
    ) -> Result<(), StorageError> {
        // Clone the cheap `Bytes` handle so the shard lock is released before writing.
        let data = self
            .blobs
            .get(id)
            .map(|b| b.data.clone())
            .ok_or_else(|| self.not_found(id))?;
        sink.write_all(&data).await?;
        sink.flush().await?;
        Ok(())
    }

    async fn delete_blob(&self, id: &str) -> Result<(), StorageError> {
        self.blobs.remove(id).ok_or_else(|| self.not_found(id))?;
        self.retentions.remove(id);
        Ok(())
    }

    async fn check_blob(&self, id: &str) -> Result<CheckInfo, StorageError> {
        let mut blob = self.blobs.get_mut(id).ok_or_else(|| self.not_found(id))?;
        let now = now_ms();
        let actual = digest_bytes(&blob.data);
        let info = if actual != blob.desc.hash {
            CheckInfo::unhealthy(
                now,
                format!("hash mismatch: stored {}, actual {actual}", blob.desc.hash),
            )
        } else if blob.data.len() as u64 != blob.desc.content_length {
            CheckInfo::unhealthy(
                now,
                format!(
                    "length mismatch: stored {}, actual {}",
                    blob.desc.content_length,
                    blob.data.len()
                ),
            )
        } else {
            CheckInfo::healthy(now)
        };
        blob.desc.check = Some(info.clone());
        Ok(info)
    }

    async fn get_all_retentions(
        &self,
        callback: &mut RetentionCallback<'_>,
    ) -> Result<(), StorageError> {
        let entries: Vec<RetentionEntry> =
            self.retentions.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            if !callback(entry) {
                break;
            }
        }
        Ok(())
    }

    async fn add_retention(&self, entry: &RetentionEntry) -> Result<(), StorageError> {
        self.retentions.insert(entry.blob_id.clone(), entry.clone());
        Ok(())
    }

    async fn get_retention(&self, id: &str) -> Result<RetentionEntry, StorageError> {
        self.retentions
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("retention for blob {id}")))
    }

    async fn delete_retention(&self, id: &str) -> Result<(), StorageError> {
        self.retentions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("retention for blob {id}")))
    }

    async fn reset_retention(&self, id: &str) -> Result<RetentionEntry, StorageError> {
        let mut entry = self
            .retentions
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("retention for blob {id}")))?;
        entry.retention_base = now_ms();
        Ok(entry.clone())
    }
}
