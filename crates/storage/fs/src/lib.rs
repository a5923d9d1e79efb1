mod store;

pub use store::FsBlobStorage;
