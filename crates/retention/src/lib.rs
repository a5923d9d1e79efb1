//! Time-based expiry of blobs.
//!
//! The [`RetentionManager`] mirrors persisted [`stratum_core::RetentionEntry`]
//! records into an in-memory list sorted by expiry and deletes expired blobs
//! on a timer through a [`TenantStorageResolver`].

mod manager;

pub use manager::{RetentionConfig, RetentionManager, RetentionState, TenantStorageResolver};
