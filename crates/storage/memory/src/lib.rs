mod store;

pub use store::MemoryBlobStorage;
