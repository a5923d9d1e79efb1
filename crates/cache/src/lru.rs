//! Sorted entry index with least-recently-accessed selection.

use std::path::PathBuf;

use bytes::Bytes;
use stratum_core::BlobDescription;

/// One cached blob.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    /// Monotonic access stamp; larger is more recent.
    pub last_access: u64,
    pub desc: BlobDescription,
    /// In-memory copy of the payload, if it is small enough and not yet dropped.
    pub data: Option<Bytes>,
    /// Spooled copy of the payload; always present.
    pub file: PathBuf,
}

/// Entries kept sorted by blob id.
#[derive(Debug, Default)]
pub(crate) struct LruIndex {
    entries: Vec<CacheEntry>,
}

impl LruIndex {
    fn position(&self, id: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.desc.blob_id.as_str().cmp(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_ok()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CacheEntry> {
        let pos = self.position(id).ok()?;
        Some(&mut self.entries[pos])
    }

    /// Insert in sorted position. Hands the entry back if the id is taken.
    pub fn insert(&mut self, entry: CacheEntry) -> Result<(), CacheEntry> {
        match self.position(&entry.desc.blob_id) {
            Ok(_) => Err(entry),
            Err(pos) => {
                self.entries.insert(pos, entry);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        let pos = self.position(id).ok()?;
        Some(self.entries.remove(pos))
    }

    /// Remove the least recently accessed entry.
    pub fn evict_oldest(&mut self) -> Option<CacheEntry> {
        let pos = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(pos, _)| pos)?;
        Some(self.entries.remove(pos))
    }

    /// Drop the in-memory payload of the least recently accessed entry still
    /// holding one, returning the number of bytes released.
    pub fn drop_oldest_data(&mut self) -> Option<u64> {
        let entry = self
            .entries
            .iter_mut()
            .filter(|e| e.data.is_some())
            .min_by_key(|e| e.last_access)?;
        entry.data.take().map(|data| data.len() as u64)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.desc.blob_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, last_access: u64, data: Option<&'static [u8]>) -> CacheEntry {
        CacheEntry {
            last_access,
            desc: BlobDescription::default().with_id(id),
            data: data.map(Bytes::from_static),
            file: PathBuf::from(format!("{id}.bin")),
        }
    }

    #[test]
    fn keeps_ids_sorted_and_unique() {
        let mut index = LruIndex::default();
        for id in ["c", "a", "b"] {
            index.insert(entry(id, 0, None)).unwrap();
        }
        assert_eq!(index.ids(), vec!["a", "b", "c"]);
        assert!(index.insert(entry("b", 9, None)).is_err());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn evicts_least_recently_accessed() {
        let mut index = LruIndex::default();
        index.insert(entry("a", 3, None)).unwrap();
        index.insert(entry("b", 1, None)).unwrap();
        index.insert(entry("c", 2, None)).unwrap();
        assert_eq!(index.evict_oldest().unwrap().desc.blob_id, "b");
        index.get_mut("a").unwrap().last_access = 0;
        assert_eq!(index.evict_oldest().unwrap().desc.blob_id, "a");
    }

    #[test]
    fn drops_data_of_oldest_holder_only() {
        let mut index = LruIndex::default();
        index.insert(entry("a", 1, None)).unwrap();
        index.insert(entry("b", 2, Some(b"1234"))).unwrap();
        index.insert(entry("c", 3, Some(b"12"))).unwrap();
        assert_eq!(index.drop_oldest_data(), Some(4));
        assert!(index.get_mut("b").unwrap().data.is_none());
        assert_eq!(index.drop_oldest_data(), Some(2));
        assert_eq!(index.drop_oldest_data(), None);
        assert_eq!(index.len(), 3);
    }
}
