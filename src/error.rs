use zarrs::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    /// A node claimed to be a group or dataset could not be resolved as one.
    #[error("structural error at {path}: {message}")]
    Structural { path: String, message: String },
    /// A chunk-index blob is missing its source record or a location field.
    #[error("incomplete chunk metadata at {key}: {message}")]
    IncompleteMetadata { key: String, message: String },
    /// The chunk key has no entry in its array's chunk index.
    #[error("chunk {0} not found")]
    NotFound(String),
    #[error("cannot {operation} {key}: the virtual chunk store is read-only")]
    ImmutableStore {
        operation: &'static str,
        key: String,
    },
    #[error("backing store error: {0}")]
    BackingStore(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }

    pub fn structural(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Structural {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn incomplete(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IncompleteMetadata {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether this error means "no bytes here, use the fill value".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<Error> for StorageError {
    fn from(value: Error) -> Self {
        match value {
            Error::Storage(e) => e,
            Error::BackingStore(e) => StorageError::from(e),
            e => StorageError::Other(e.to_string()),
        }
    }
}
