pub mod error;
pub mod hash;
pub mod store;
pub mod testing;
pub mod transfer;

pub use error::StorageError;
pub use hash::{HASH_PREFIX, HashingReader, HashingSink, digest_bytes};
pub use store::{
    BlobStorage, ListCallback, PayloadReader, PayloadWriter, RetentionCallback, list_blob_ids,
    list_retentions,
};
pub use transfer::{PIPE_CAPACITY, copy_blob};
