use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stratum_storage::{BlobStorage, HashingSink, StorageError, list_blob_ids};

use crate::report::{CheckResultLine, ReportWriter, Section};

/// Line counts of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub cache: usize,
    pub primary: usize,
    pub backup: usize,
    /// Lines flagged `hasError` across all sections.
    pub errors: usize,
    /// The run stopped early; later sections may be empty.
    pub cancelled: bool,
}

/// One audit run over the tiers of a single tenant.
///
/// The primary tier is authoritative: every primary blob is re-hashed and
/// compared with its stored hash, and so is its backup copy. Cached blobs
/// must also exist in the primary tier, and backup blobs the primary tier
/// does not know are orphans.
///
/// A blob disappearing while the run is in progress is reported on its own
/// line; only failures to list a tier abort the run.
pub struct ConsistencyChecker {
    tenant: String,
    primary: Arc<dyn BlobStorage>,
    backup: Option<Arc<dyn BlobStorage>>,
    cache: Option<Arc<dyn BlobStorage>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConsistencyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyChecker")
            .field("tenant", &self.tenant)
            .field("backup", &self.backup.is_some())
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

fn missing_description(e: &StorageError) -> String {
    if e.is_not_found() {
        "description missing, blob removed during check".to_owned()
    } else {
        format!("description unreadable: {e}")
    }
}

/// Digest of a tier's stored payload.
async fn content_hash(tier: &dyn BlobStorage, id: &str) -> Result<String, StorageError> {
    let mut sink = HashingSink::new();
    tier.retrieve_blob(id, &mut sink).await?;
    Ok(sink.finish().0)
}

impl ConsistencyChecker {
    pub fn new(
        tenant: impl Into<String>,
        primary: Arc<dyn BlobStorage>,
        backup: Option<Arc<dyn BlobStorage>>,
        cache: Option<Arc<dyn BlobStorage>>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            primary,
            backup,
            cache,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the run before the next blob when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Walk every tier and stream the report into `sink`.
    pub async fn run<W>(&self, sink: &mut W) -> Result<CheckSummary, StorageError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        info!(tenant = %self.tenant, "consistency check started");
        let mut summary = CheckSummary::default();
        let mut report = ReportWriter::begin(sink, &self.tenant).await?;

        report.open(Section::Cache).await?;
        if let Some(cache) = &self.cache {
            for id in list_blob_ids(cache.as_ref()).await? {
                if self.cancelled(&mut summary) {
                    break;
                }
                if let Some(line) = self.check_cached(cache.as_ref(), &id).await {
                    summary.errors += usize::from(line.has_error);
                    report.write_line(&line).await?;
                }
            }
        }
        summary.cache = report.close().await?;

        report.open(Section::Primary).await?;
        let primary_ids = list_blob_ids(self.primary.as_ref()).await?;
        for id in &primary_ids {
            if self.cancelled(&mut summary) {
                break;
            }
            let line = self.check_primary(id).await;
            summary.errors += usize::from(line.has_error);
            report.write_line(&line).await?;
        }
        summary.primary = report.close().await?;

        report.open(Section::Backup).await?;
        if let Some(backup) = &self.backup {
            let seen: HashSet<&str> = primary_ids.iter().map(String::as_str).collect();
            for id in list_blob_ids(backup.as_ref()).await? {
                if self.cancelled(&mut summary) {
                    break;
                }
                if seen.contains(id.as_str()) {
                    continue;
                }
                let line = Self::check_orphan(backup.as_ref(), &id).await;
                summary.errors += usize::from(line.has_error);
                report.write_line(&line).await?;
            }
        }
        summary.backup = report.close().await?;
        report.finish().await?;

        info!(
            tenant = %self.tenant,
            cache = summary.cache,
            primary = summary.primary,
            backup = summary.backup,
            errors = summary.errors,
            cancelled = summary.cancelled,
            "consistency check finished"
        );
        Ok(summary)
    }

    fn cancelled(&self, summary: &mut CheckSummary) -> bool {
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }
        summary.cancelled
    }

    /// Whether the shared cache holds `id` for this tenant.
    async fn in_cache(&self, id: &str) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        match cache.get_blob_description(id).await {
            Ok(desc) => desc.tenant_id == self.tenant,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!(tenant = %self.tenant, blob_id = %id, error = %e, "cache lookup failed during check");
                false
            }
        }
    }

    /// Line for a cached blob, or `None` when it belongs to another tenant.
    async fn check_cached(&self, cache: &dyn BlobStorage, id: &str) -> Option<CheckResultLine> {
        let desc = match cache.get_blob_description(id).await {
            Ok(desc) => desc,
            Err(e) => {
                // Without a description the entry cannot be attributed to a tenant.
                debug!(blob_id = %id, error = %e, "cache entry skipped");
                return None;
            }
        };
        if desc.tenant_id != self.tenant {
            return None;
        }

        let mut line = CheckResultLine::new(id);
        line.filename = desc.filename;
        line.in_cache = true;
        match self.primary.has_blob(id).await {
            Ok(true) => {}
            Ok(false) => line.fail("cached blob missing in primary"),
            Err(e) => line.fail(format!("primary: {e}")),
        }
        if let Some(backup) = &self.backup {
            line.in_backup = matches!(backup.has_blob(id).await, Ok(true));
        }
        Some(line)
    }

    async fn check_primary(&self, id: &str) -> CheckResultLine {
        let mut line = CheckResultLine::new(id);
        let desc = match self.primary.get_blob_description(id).await {
            Ok(desc) => desc,
            Err(e) => {
                line.fail(missing_description(&e));
                return line;
            }
        };
        line.filename.clone_from(&desc.filename);

        match content_hash(self.primary.as_ref(), id).await {
            Ok(hash) if hash == desc.hash => line.primary_hash_ok = true,
            Ok(hash) => line.fail(format!(
                "primary: hash {hash} differs from stored {}",
                desc.hash
            )),
            Err(e) => line.fail(format!("primary: {e}")),
        }

        line.in_cache = self.in_cache(id).await;

        if let Some(backup) = &self.backup {
            match backup.has_blob(id).await {
                Ok(true) => {
                    line.in_backup = true;
                    match content_hash(backup.as_ref(), id).await {
                        Ok(hash) if hash == desc.hash => line.backup_hash_ok = true,
                        Ok(hash) => line.fail(format!(
                            "backup: hash {hash} differs from stored {}",
                            desc.hash
                        )),
                        Err(e) => line.fail(format!("backup: {e}")),
                    }
                }
                Ok(false) => line.fail("missing in backup"),
                Err(e) => line.fail(format!("backup: {e}")),
            }
        }

        if line.has_error {
            debug!(tenant = %self.tenant, blob_id = %id, messages = ?line.messages, "inconsistent blob");
        }
        line
    }

    /// Line for a backup blob the primary tier does not list.
    async fn check_orphan(backup: &dyn BlobStorage, id: &str) -> CheckResultLine {
        let mut line = CheckResultLine::new(id);
        line.in_backup = true;
        match backup.get_blob_description(id).await {
            Ok(desc) => {
                line.filename.clone_from(&desc.filename);
                line.backup_hash_ok =
                    matches!(content_hash(backup, id).await, Ok(hash) if hash == desc.hash);
            }
            Err(e) => line.fail(missing_description(&e)),
        }
        line.fail("orphaned in backup, missing in primary");
        line
    }
}
