use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use stratum_core::{BlobDescription, CheckInfo, RetentionEntry, now_ms};
use stratum_storage::{
    BlobStorage, HashingReader, HashingSink, ListCallback, PayloadReader, PayloadWriter,
    RetentionCallback, StorageError,
};

const CONTENT_EXT: &str = "bin";
const DESCRIPTION_EXT: &str = "json";

/// Local filesystem [`BlobStorage`] tier.
///
/// Layout below `root`:
///
/// ```text
/// <tenant>/blobs/<id>.bin        payload
/// <tenant>/blobs/<id>.json       description
/// <tenant>/retention/<id>.json   retention entry
/// ```
///
/// The description is written last, so a blob only becomes visible once its
/// payload is complete.
#[derive(Debug, Clone)]
pub struct FsBlobStorage {
    tenant: String,
    blob_dir: PathBuf,
    retention_dir: PathBuf,
}

impl FsBlobStorage {
    /// Create a tier for `tenant` rooted at `root`. Call [`BlobStorage::init`] before use.
    pub fn new(root: impl AsRef<Path>, tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        let base = root.as_ref().join(&tenant);
        Self {
            tenant,
            blob_dir: base.join("blobs"),
            retention_dir: base.join("retention"),
        }
    }

    /// Directory holding payloads and descriptions.
    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    /// Path of a blob's payload file.
    pub fn content_path(&self, id: &str) -> PathBuf {
        self.blob_dir.join(format!("{id}.{CONTENT_EXT}"))
    }

    fn description_path(&self, id: &str) -> PathBuf {
        self.blob_dir.join(format!("{id}.{DESCRIPTION_EXT}"))
    }

    fn retention_path(&self, id: &str) -> PathBuf {
        self.retention_dir.join(format!("{id}.json"))
    }

    fn not_found(&self, id: &str) -> StorageError {
        StorageError::NotFound(format!("blob {id} in tenant {}", self.tenant))
    }

    /// Map an I/O error, turning a missing file into `NotFound` for `id`.
    fn io_error(&self, id: &str, e: std::io::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            self.not_found(id)
        } else {
            StorageError::Io(e)
        }
    }

    async fn read_description(&self, id: &str) -> Result<BlobDescription, StorageError> {
        validate_id(id)?;
        let raw = fs::read(self.description_path(id))
            .await
            .map_err(|e| self.io_error(id, e))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_description(&self, desc: &BlobDescription) -> Result<(), StorageError> {
        let raw = serde_json::to_vec_pretty(desc)?;
        write_atomic(&self.description_path(&desc.blob_id), &raw).await
    }

    async fn write_retention(&self, entry: &RetentionEntry) -> Result<(), StorageError> {
        validate_id(&entry.blob_id)?;
        let raw = serde_json::to_vec_pretty(entry)?;
        write_atomic(&self.retention_path(&entry.blob_id), &raw).await
    }

    async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Reject ids that could escape the tenant directory.
fn validate_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\'])
        || id.contains("..")
    {
        return Err(StorageError::InvalidInput(format!("invalid blob id: {id:?}")));
    }
    Ok(())
}

/// Write through a temporary file and rename, so readers never see a torn file.
///
/// Each call uses its own temporary name; concurrent writers of one record
/// race only on the rename, and the last one wins.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let written = async {
        let mut file = File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;
    if let Err(e) = written {
        FsBlobStorage::remove_if_present(&tmp).await?;
        return Err(StorageError::Io(e));
    }
    Ok(())
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.blob_dir).await?;
        fs::create_dir_all(&self.retention_dir).await?;
        debug!(tenant = %self.tenant, dir = %self.blob_dir.display(), "filesystem tier ready");
        Ok(())
    }

    fn tenant(&self) -> &str {
        &self.tenant
    }

    async fn list_blobs(&self, callback: &mut ListCallback<'_>) -> Result<(), StorageError> {
        let mut dir = fs::read_dir(&self.blob_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTION_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
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
        validate_id(&id)?;

        let content_path = self.content_path(&id);
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&content_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(id));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut reader = HashingReader::new(payload);
        let copied = async {
            tokio::io::copy(&mut reader, &mut file).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = copied {
            Self::remove_if_present(&content_path).await?;
            return Err(StorageError::Io(e));
        }

        let (hash, len) = reader.finish();
        if desc.content_length > 0 && desc.content_length != len {
            Self::remove_if_present(&content_path).await?;
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

        if let Err(e) = self.write_description(desc).await {
            Self::remove_if_present(&content_path).await?;
            return Err(e);
        }
        if let Some(entry) = desc.retention_entry() {
            self.write_retention(&entry).await?;
        }
        Ok(id)
    }

    async fn has_blob(&self, id: &str) -> Result<bool, StorageError> {
        if validate_id(id).is_err() {
            return Ok(false);
        }
        Ok(fs::try_exists(self.description_path(id)).await?)
    }

    async fn get_blob_description(&self, id: &str) -> Result<BlobDescription, StorageError> {
        self.read_description(id).await
    }

    async fn update_blob_description(
        &self,
        id: &str,
        desc: &BlobDescription,
    ) -> Result<(), StorageError> {
        let stored = self.read_description(id).await?;
        let mut updated = desc.clone();
        updated.blob_id = id.to_owned();
        updated.keep_content_fields(&stored);
        self.write_description(&updated).await
    }

    async fn retrieve_blob(
        &self,
        id: &str,
        sink: &mut PayloadWriter<'_>,
    ) -> Result<(), StorageError> {
        validate_id(id)?;
        if !fs::try_exists(self.description_path(id)).await? {
            return Err(self.not_found(id));
        }
        let mut file = File::open(self.content_path(id))
            .await
            .map_err(|e| self.io_error(id, e))?;
        tokio::io::copy(&mut file, &mut *sink).await?;
        sink.flush().await?;
        Ok(())
    }

    async fn delete_blob(&self, id: &str) -> Result<(), StorageError> {
        validate_id(id)?;
        fs::remove_file(self.description_path(id))
            .await
            .map_err(|e| self.io_error(id, e))?;
        Self::remove_if_present(&self.content_path(id)).await?;
        if let Err(e) = Self::remove_if_present(&self.retention_path(id)).await {
            warn!(tenant = %self.tenant, blob_id = %id, error = %e, "failed to remove retention entry");
        }
        Ok(())
    }

    async fn check_blob(&self, id: &str) -> Result<CheckInfo, StorageError> {
        let mut desc = self.read_description(id).await?;
        let now = now_ms();
        let info = match File::open(self.content_path(id)).await {
            Ok(mut file) => {
                let mut sink = HashingSink::new();
                tokio::io::copy(&mut file, &mut sink).await?;
                let (actual, len) = sink.finish();
                if actual != desc.hash {
                    CheckInfo::unhealthy(
                        now,
                        format!("hash mismatch: stored {}, actual {actual}", desc.hash),
                    )
                } else if len != desc.content_length {
                    CheckInfo::unhealthy(
                        now,
                        format!(
                            "length mismatch: stored {}, actual {len}",
                            desc.content_length
                        ),
                    )
                } else {
                    CheckInfo::healthy(now)
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                CheckInfo::unhealthy(now, "content file missing")
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        desc.check = Some(info.clone());
        self.write_description(&desc).await?;
        Ok(info)
    }

    async fn get_all_retentions(
        &self,
        callback: &mut RetentionCallback<'_>,
    ) -> Result<(), StorageError> {
        let mut dir = fs::read_dir(&self.retention_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                // Deleted between listing and reading.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            match serde_json::from_slice::<RetentionEntry>(&raw) {
                Ok(retention) => {
                    if !callback(retention) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(tenant = %self.tenant, path = %path.display(), error = %e, "skipping unreadable retention entry");
                }
            }
        }
        Ok(())
    }

    async fn add_retention(&self, entry: &RetentionEntry) -> Result<(), StorageError> {
        self.write_retention(entry).await
    }

    async fn get_retention(&self, id: &str) -> Result<RetentionEntry, StorageError> {
        validate_id(id)?;
        let raw = fs::read(self.retention_path(id)).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(format!("retention for blob {id}"))
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn delete_retention(&self, id: &str) -> Result<(), StorageError> {
        validate_id(id)?;
        fs::remove_file(self.retention_path(id))
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    StorageError::NotFound(format!("retention for blob {id}"))
                } else {
                    StorageError::Io(e)
                }
            })
    }

    async fn reset_retention(&self, id: &str) -> Result<RetentionEntry, StorageError> {
        let mut entry = self.get_retention(id).await?;
        entry.retention_base = now_ms();
        self.write_retention(&entry).await?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_ids() {
        assert!(validate_id("abc-123").is_ok());
        for bad in ["", ".hidden", "a/b", "a\\b", "x..y"] {
            assert!(validate_id(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn layout_is_tenant_scoped() {
        let storage = FsBlobStorage::new("/data", "acme");
        assert_eq!(storage.content_path("b1"), PathBuf::from("/data/acme/blobs/b1.bin"));
        assert_eq!(
            storage.retention_path("b1"),
            PathBuf::from("/data/acme/retention/b1.json")
        );
    }
}
