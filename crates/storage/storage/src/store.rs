use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use stratum_core::{BlobDescription, CheckInfo, RetentionEntry};

use crate::error::StorageError;

/// Payload source handed to [`BlobStorage::store_blob`].
pub type PayloadReader<'a> = dyn AsyncRead + Send + Unpin + 'a;

/// Payload sink handed to [`BlobStorage::retrieve_blob`].
pub type PayloadWriter<'a> = dyn AsyncWrite + Send + Unpin + 'a;

/// Callback for [`BlobStorage::list_blobs`]. Return `false` to stop early.
pub type ListCallback<'a> = dyn FnMut(&str) -> bool + Send + 'a;

/// Callback for [`BlobStorage::get_all_retentions`]. Return `false` to stop early.
pub type RetentionCallback<'a> = dyn FnMut(RetentionEntry) -> bool + Send + 'a;

/// Blob lifecycle and retention capability.
///
/// Every physical tier (primary, backup, tenant backup, cache) implements
/// this trait, and so does the gateway composing them. Orchestration code
/// only ever sees `Arc<dyn BlobStorage>`.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Prepare the tier for use (create directories, start maintenance tasks).
    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Tenant served by this tier. Shared tiers such as the cache return `""`.
    fn tenant(&self) -> &str;

    /// Visit every stored blob id.
    async fn list_blobs(&self, callback: &mut ListCallback<'_>) -> Result<(), StorageError>;

    /// Store a new blob and return its final id.
    ///
    /// Assigns an id when `desc.blob_id` is empty and fills in the length,
    /// hash and timestamps on `desc`. Fails with
    /// [`StorageError::AlreadyExists`] for a duplicate id and with
    /// [`StorageError::InvalidInput`] when a declared non-zero
    /// `content_length` does not match the payload; no content is left behind
    /// in that case.
    async fn store_blob(
        &self,
        desc: &mut BlobDescription,
        payload: &mut PayloadReader<'_>,
    ) -> Result<String, StorageError>;

    /// Whether a blob with this id is stored.
    async fn has_blob(&self, id: &str) -> Result<bool, StorageError>;

    /// Fetch a blob's description.
    async fn get_blob_description(&self, id: &str) -> Result<BlobDescription, StorageError>;

    /// Replace a blob's metadata. Content-derived fields are kept.
    async fn update_blob_description(
        &self,
        id: &str,
        desc: &BlobDescription,
    ) -> Result<(), StorageError>;

    /// Stream a blob's payload into `sink`.
    async fn retrieve_blob(
        &self,
        id: &str,
        sink: &mut PayloadWriter<'_>,
    ) -> Result<(), StorageError>;

    /// Remove a blob, its description and its retention entry.
    async fn delete_blob(&self, id: &str) -> Result<(), StorageError>;

    /// Recompute the payload hash, record the outcome on the description and return it.
    async fn check_blob(&self, id: &str) -> Result<CheckInfo, StorageError>;

    /// Visit every persisted retention entry.
    async fn get_all_retentions(
        &self,
        callback: &mut RetentionCallback<'_>,
    ) -> Result<(), StorageError>;

    /// Persist a retention entry, replacing any entry for the same blob.
    async fn add_retention(&self, entry: &RetentionEntry) -> Result<(), StorageError>;

    /// Fetch the retention entry for a blob.
    async fn get_retention(&self, id: &str) -> Result<RetentionEntry, StorageError>;

    /// Remove the retention entry for a blob.
    async fn delete_retention(&self, id: &str) -> Result<(), StorageError>;

    /// Restart a blob's countdown from now and return the updated entry.
    async fn reset_retention(&self, id: &str) -> Result<RetentionEntry, StorageError>;

    /// Release resources and stop background work.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Collect every blob id of a tier.
pub async fn list_blob_ids(storage: &dyn BlobStorage) -> Result<Vec<String>, StorageError> {
    let mut ids = Vec::new();
    storage
        .list_blobs(&mut |id: &str| {
            ids.push(id.to_owned());
            true
        })
        .await?;
    Ok(ids)
}

/// Collect every persisted retention entry of a tier.
pub async fn list_retentions(
    storage: &dyn BlobStorage,
) -> Result<Vec<RetentionEntry>, StorageError> {
    let mut entries = Vec::new();
    storage
        .get_all_retentions(&mut |entry: RetentionEntry| {
            entries.push(entry);
            true
        })
        .await?;
    Ok(entries)
}
