use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("failed to encode or decode document `{doc_id}`")]
    Codec {
        doc_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("write conflict on document `{doc_id}` after {attempts} attempts")]
    Conflict { doc_id: String, attempts: u32 },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a codec error for the given document.
    pub fn codec(doc_id: impl Into<String>, source: serde_json::Error) -> Self {
        StorageError::Codec {
            doc_id: doc_id.into(),
            source,
        }
    }
}
