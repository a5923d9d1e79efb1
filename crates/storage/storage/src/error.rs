use thiserror::Error;

/// Errors from blob storage tiers and the components composing them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The blob, retention entry or tenant does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A blob with the same identifier is already stored.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The request was malformed, e.g. a declared length did not match.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A tier or index backend failed.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The tier does not support this capability.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Local I/O failed while reading or writing content.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A description or retention record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether this error means "absent" rather than a backend failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error reports a duplicate create.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
