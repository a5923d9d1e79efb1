//! Blob metadata types shared by every Stratum storage tier.

pub mod blob;
pub mod check;
pub mod retention;

pub use blob::BlobDescription;
pub use check::CheckInfo;
pub use retention::{MINUTE_MS, RetentionEntry};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
