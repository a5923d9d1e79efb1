use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::check::CheckInfo;
use crate::retention::RetentionEntry;

/// Metadata record for one stored blob.
///
/// The description travels with the payload through every tier. Arbitrary
/// caller attributes live in [`properties`](Self::properties) and are kept
/// verbatim, including nested lists and objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescription {
    /// Unique blob identifier. Assigned on store when empty.
    #[serde(rename = "blobID", default)]
    pub blob_id: String,
    /// Tenant that owns the blob.
    #[serde(rename = "tenantID", default)]
    pub tenant_id: String,
    /// Payload size in bytes. `0` on input means "unknown".
    #[serde(default)]
    pub content_length: u64,
    /// MIME content type.
    #[serde(default)]
    pub content_type: String,
    /// Original filename.
    #[serde(default)]
    pub filename: String,
    /// Creation time, epoch milliseconds.
    #[serde(default)]
    pub creation_date: i64,
    /// Last access time, epoch milliseconds.
    #[serde(default)]
    pub last_access: i64,
    /// Time to live in minutes. `0` disables expiry.
    #[serde(default)]
    pub retention: u64,
    /// Algorithm-tagged content digest, e.g. `sha-256:<hex>`.
    #[serde(default)]
    pub hash: String,
    /// Result of the most recent integrity check, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckInfo>,
    /// Caller supplied attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl BlobDescription {
    /// Create a description for a new blob owned by `tenant`.
    pub fn new(
        tenant: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    /// Set the blob identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.blob_id = id.into();
        self
    }

    /// Set the retention in minutes.
    #[must_use]
    pub fn with_retention(mut self, minutes: u64) -> Self {
        self.retention = minutes;
        self
    }

    /// Declare the expected payload length.
    #[must_use]
    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = len;
        self
    }

    /// Attach a caller property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Assign a fresh UUID when no identifier is set and return the id.
    pub fn ensure_id(&mut self) -> &str {
        if self.blob_id.is_empty() {
            self.blob_id = uuid::Uuid::new_v4().to_string();
        }
        &self.blob_id
    }

    /// Fill creation and access timestamps that are still unset.
    pub fn ensure_timestamps(&mut self, now_ms: i64) {
        if self.creation_date == 0 {
            self.creation_date = now_ms;
        }
        if self.last_access == 0 {
            self.last_access = now_ms;
        }
    }

    /// The retention record for this blob, or `None` when it never expires.
    pub fn retention_entry(&self) -> Option<RetentionEntry> {
        RetentionEntry::from_description(self)
    }

    /// Replace the content-derived fields with those of `stored`.
    ///
    /// Metadata updates must not alter what the payload is known to be.
    pub fn keep_content_fields(&mut self, stored: &BlobDescription) {
        self.content_length = stored.content_length;
        self.hash.clone_from(&stored.hash);
        self.creation_date = stored.creation_date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn description_serde_uses_wire_names() {
        let desc = BlobDescription::new("acme", "report.pdf", "application/pdf")
            .with_id("b-1")
            .with_retention(5);
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["blobID"], "b-1");
        assert_eq!(json["tenantID"], "acme");
        assert_eq!(json["contentType"], "application/pdf");
        assert_eq!(json["retention"], 5);
        assert!(json.get("properties").is_none());
        assert!(json.get("check").is_none());
    }

    #[test]
    fn properties_roundtrip_without_loss() {
        let desc = BlobDescription::new("acme", "a.bin", "application/octet-stream")
            .with_property("owner", "ops")
            .with_property("tags", json!(["red", "green", ["nested", 1]]))
            .with_property("limits", json!({"max": 3, "soft": true}));

        let text = serde_json::to_string(&desc).unwrap();
        let back: BlobDescription = serde_json::from_str(&text).unwrap();
        assert_eq!(back.properties, desc.properties);
        assert_eq!(back, desc);
    }

    #[test]
    fn ensure_id_only_assigns_once() {
        let mut desc = BlobDescription::default();
        let first = desc.ensure_id().to_owned();
        assert!(!first.is_empty());
        assert_eq!(desc.ensure_id(), first);
    }

    #[test]
    fn ensure_timestamps_keeps_existing_values() {
        let mut desc = BlobDescription {
            creation_date: 10,
            ..BlobDescription::default()
        };
        desc.ensure_timestamps(99);
        assert_eq!(desc.creation_date, 10);
        assert_eq!(desc.last_access, 99);
    }

    #[test]
    fn deserializes_sparse_document() {
        let desc: BlobDescription = serde_json::from_str(r#"{"blobID":"x"}"#).unwrap();
        assert_eq!(desc.blob_id, "x");
        assert_eq!(desc.retention, 0);
        assert!(desc.properties.is_empty());
    }
}
