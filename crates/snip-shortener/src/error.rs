use snip_core::StorageError;
use snip_generator::GeneratorError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("batch of {len} urls exceeds the maximum of {max}")]
    CapacityExceeded { len: usize, max: usize },
    #[error("batch contains no valid urls")]
    NoValidUrls,
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code has been deleted: {0}")]
    Gone(String),
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
    #[error("code generation failed: {0}")]
    Generator(#[from] GeneratorError),
    #[error("no free short code after {0} attempts")]
    CodeSpaceExhausted(u32),
    #[error("delete queue is closed")]
    DeleteQueueClosed,
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Unsupported { backend, operation } => {
                Self::Unsupported { backend, operation }
            }
            other => Self::Storage(other),
        }
    }
}

impl ShortenerError {
    /// Returns `true` when the backing store could not be reached or did not
    /// answer in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::Unavailable(_) | StorageError::Timeout(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_storage_errors_are_lifted() {
        let err = ShortenerError::from(StorageError::Unsupported {
            backend: "memory",
            operation: "list_by_owner",
        });
        assert!(matches!(
            err,
            ShortenerError::Unsupported {
                backend: "memory",
                operation: "list_by_owner"
            }
        ));
    }

    #[test]
    fn other_storage_errors_are_wrapped() {
        let err = ShortenerError::from(StorageError::Timeout("get exceeded 2000ms".into()));
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "storage error: storage operation timed out: get exceeded 2000ms"
        );
    }
}
