//! Search index collaborator.
//!
//! The gateway only needs the narrow [`BlobIndex`] contract; query grammar
//! is up to the backend. [`MemoryIndex`] does case-insensitive substring
//! matching over filenames and string properties.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use stratum_core::BlobDescription;
use stratum_storage::StorageError;

/// Callback receiving matching blob ids. Return `false` to stop early.
pub type SearchCallback<'a> = dyn FnMut(&str) -> bool + Send + 'a;

#[async_trait]
pub trait BlobIndex: Send + Sync {
    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Add a newly stored blob.
    async fn index(&self, desc: &BlobDescription) -> Result<(), StorageError>;

    /// Replace the indexed metadata of a blob.
    async fn update(&self, desc: &BlobDescription) -> Result<(), StorageError>;

    async fn remove(&self, tenant: &str, id: &str) -> Result<(), StorageError>;

    /// Visit the ids of `tenant`'s blobs matching `query`.
    async fn search(
        &self,
        tenant: &str,
        query: &str,
        callback: &mut SearchCallback<'_>,
    ) -> Result<(), StorageError>;

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// In-memory [`BlobIndex`] keyed by `(tenant, blob id)`.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    docs: DashMap<(String, String), BlobDescription>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn key(desc: &BlobDescription) -> (String, String) {
        (desc.tenant_id.clone(), desc.blob_id.clone())
    }
}

fn value_matches(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| value_matches(v, needle)),
        Value::Object(map) => map.values().any(|v| value_matches(v, needle)),
        _ => false,
    }
}

fn matches(desc: &BlobDescription, needle: &str) -> bool {
    needle.is_empty()
        || desc.filename.to_lowercase().contains(needle)
        || desc.properties.values().any(|v| value_matches(v, needle))
}

#[async_trait]
impl BlobIndex for MemoryIndex {
    async fn index(&self, desc: &BlobDescription) -> Result<(), StorageError> {
        self.docs.insert(Self::key(desc), desc.clone());
        Ok(())
    }

    async fn update(&self, desc: &BlobDescription) -> Result<(), StorageError> {
        self.docs.insert(Self::key(desc), desc.clone());
        Ok(())
    }

    async fn remove(&self, tenant: &str, id: &str) -> Result<(), StorageError> {
        self.docs.remove(&(tenant.to_owned(), id.to_owned()));
        Ok(())
    }

    async fn search(
        &self,
        tenant: &str,
        query: &str,
        callback: &mut SearchCallback<'_>,
    ) -> Result<(), StorageError> {
        let needle = query.trim().to_lowercase();
        let mut hits: Vec<String> = self
            .docs
            .iter()
            .filter(|doc| doc.key().0 == tenant && matches(doc.value(), &needle))
            .map(|doc| doc.key().1.clone())
            .collect();
        hits.sort();
        for id in &hits {
            if !callback(id) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn search(index: &MemoryIndex, tenant: &str, query: &str) -> Vec<String> {
        let mut out = Vec::new();
        index
            .search(tenant, query, &mut |id: &str| {
                out.push(id.to_owned());
                true
            })
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn matches_filename_and_nested_properties() {
        let index = MemoryIndex::new();
        index
            .index(&BlobDescription::new("acme", "Invoice-2024.pdf", "application/pdf").with_id("a"))
            .await
            .unwrap();
        index
            .index(
                &BlobDescription::new("acme", "scan.png", "image/png")
                    .with_id("b")
                    .with_property("tags", json!(["receipt", ["invoice", "q3"]])),
            )
            .await
            .unwrap();
        index
            .index(&BlobDescription::new("globex", "invoice.txt", "text/plain").with_id("c"))
            .await
            .unwrap();

        assert_eq!(search(&index, "acme", "INVOICE").await, vec!["a", "b"]);
        assert_eq!(search(&index, "acme", "").await, vec!["a", "b"]);
        assert_eq!(search(&index, "globex", "invoice").await, vec!["c"]);
    }

    #[tokio::test]
    async fn remove_drops_document() {
        let index = MemoryIndex::new();
        let desc = BlobDescription::new("acme", "x.txt", "text/plain").with_id("x");
        index.index(&desc).await.unwrap();
        index.remove("acme", "x").await.unwrap();
        assert!(index.is_empty());
        assert!(search(&index, "acme", "").await.is_empty());
    }
}
