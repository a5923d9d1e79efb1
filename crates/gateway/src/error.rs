use stratum_storage::StorageError;
use thiserror::Error;

/// Errors raised while assembling gateways.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A tier failed while being prepared.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<GatewayError> for StorageError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Configuration(msg) => StorageError::InvalidInput(msg),
            GatewayError::Storage(inner) => inner,
        }
    }
}
