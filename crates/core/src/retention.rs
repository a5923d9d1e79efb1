use serde::{Deserialize, Serialize};

use crate::blob::BlobDescription;

/// Milliseconds per retention minute.
pub const MINUTE_MS: i64 = 60_000;

/// Expiry bookkeeping record for a blob with a time to live.
///
/// Derived from a [`BlobDescription`] whenever `retention > 0` and persisted
/// by the tier that owns the blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionEntry {
    /// Blob this entry expires.
    #[serde(rename = "blobID")]
    pub blob_id: String,
    /// Tenant owning the blob.
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    /// Original filename, kept for log output.
    #[serde(default)]
    pub filename: String,
    /// Blob creation time, epoch milliseconds.
    pub creation_date: i64,
    /// Time to live in minutes.
    pub retention: u64,
    /// Countdown start override, epoch milliseconds. `0` uses `creation_date`.
    #[serde(default)]
    pub retention_base: i64,
}

impl RetentionEntry {
    /// Project a description onto its retention entry.
    ///
    /// Returns `None` when the blob has no time to live.
    pub fn from_description(desc: &BlobDescription) -> Option<Self> {
        if desc.retention == 0 {
            return None;
        }
        Some(Self {
            blob_id: desc.blob_id.clone(),
            tenant_id: desc.tenant_id.clone(),
            filename: desc.filename.clone(),
            creation_date: desc.creation_date,
            retention: desc.retention,
            retention_base: 0,
        })
    }

    /// Instant at which the blob expires, epoch milliseconds.
    pub fn expires_at_ms(&self) -> i64 {
        let base = if self.retention_base > 0 {
            self.retention_base
        } else {
            self.creation_date
        };
        let ttl = i64::try_from(self.retention)
            .unwrap_or(i64::MAX)
            .saturating_mul(MINUTE_MS);
        base.saturating_add(ttl)
    }

    /// Whether the entry is due at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms() <= now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(creation: i64, minutes: u64, base: i64) -> RetentionEntry {
        RetentionEntry {
            blob_id: "b".into(),
            tenant_id: "t".into(),
            filename: "f".into(),
            creation_date: creation,
            retention: minutes,
            retention_base: base,
        }
    }

    #[test]
    fn expiry_uses_creation_date_without_base() {
        let e = entry(1_000, 2, 0);
        assert_eq!(e.expires_at_ms(), 1_000 + 2 * 60_000);
        assert!(!e.is_expired(120_999));
        assert!(e.is_expired(121_000));
    }

    #[test]
    fn retention_base_overrides_creation_date() {
        let e = entry(1_000, 1, 500_000);
        assert_eq!(e.expires_at_ms(), 560_000);
    }

    #[test]
    fn no_entry_without_retention() {
        let desc = BlobDescription::new("t", "f", "text/plain");
        assert!(RetentionEntry::from_description(&desc).is_none());

        let desc = desc.with_id("x").with_retention(3);
        let e = RetentionEntry::from_description(&desc).unwrap();
        assert_eq!(e.blob_id, "x");
        assert_eq!(e.retention, 3);
        assert_eq!(e.retention_base, 0);
    }

    #[test]
    fn huge_retention_saturates() {
        let e = entry(1, u64::MAX, 0);
        assert_eq!(e.expires_at_ms(), i64::MAX);
    }
}
