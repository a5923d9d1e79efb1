//! Streamed tier-to-tier copies.
//!
//! A copy never buffers the full payload: the source's `retrieve_blob`
//! writes into one end of a bounded in-memory pipe while the target's
//! `store_blob` reads from the other end. Both run concurrently, so the
//! writer blocks exactly as long as the reader is slower, and memory use
//! stays at [`PIPE_CAPACITY`] regardless of blob size.

use tokio::io::AsyncWriteExt;
use tracing::debug;

use stratum_core::BlobDescription;

use crate::error::StorageError;
use crate::store::BlobStorage;

/// Bytes buffered between producer and consumer.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Copy one blob from `source` into `target`, returning the id stored at the target.
///
/// `desc` is the description to store at the target, normally the source's
/// own description. When the source fails mid-stream the partial copy is
/// removed from the target and the source error is returned.
pub async fn copy_blob(
    source: &dyn BlobStorage,
    target: &dyn BlobStorage,
    desc: &BlobDescription,
) -> Result<String, StorageError> {
    let (mut writer, mut reader) = tokio::io::duplex(PIPE_CAPACITY);
    let id = desc.blob_id.clone();
    let mut target_desc = desc.clone();

    let produce = async move {
        let res = source.retrieve_blob(&id, &mut writer).await;
        // Signal end of stream to the consumer even on failure.
        let _ = writer.shutdown().await;
        res
    };
    let consume = async move { target.store_blob(&mut target_desc, &mut reader).await };

    let (read_res, write_res) = tokio::join!(produce, consume);
    match (read_res, write_res) {
        (Ok(()), Ok(stored)) => {
            debug!(blob_id = %stored, "blob copied between tiers");
            Ok(stored)
        }
        (Err(read_err), Ok(stored)) => {
            if let Err(e) = target.delete_blob(&stored).await {
                debug!(blob_id = %stored, error = %e, "failed to roll back partial copy");
            }
            Err(read_err)
        }
        // A truncated stream shows up as a length mismatch at the target;
        // the source error is the real cause.
        (Err(read_err), Err(StorageError::InvalidInput(_))) => Err(read_err),
        (_, Err(write_err)) => Err(write_err),
    }
}

