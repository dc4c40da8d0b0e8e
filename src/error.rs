use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the retrieval core.
///
/// Cache problems never show up here: the cache reports misses as `None`
/// and save failures are logged by the engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("no movies provided for embedding generation")]
    EmptyInput,

    #[error("no valid movies could be processed")]
    NoValidRecords,

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("query dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("duplicate movie id {0}")]
    DuplicateId(i64),

    /// The index was never built (or was removed), as opposed to [`Self::Corrupt`].
    #[error("index file not found: {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("index not initialized")]
    NotInitialized,

    #[error("embedding store must be a JSON object mapping movie ids to vectors")]
    NotAMapping,

    #[error("corrupt artifact: {0}")]
    Corrupt(String),

    #[error("embedding model failed")]
    Model(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RetrievalError {
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// True for failures caused by the caller's input rather than the environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput
                | Self::NoValidRecords
                | Self::Shape(_)
                | Self::DimensionMismatch { .. }
                | Self::DuplicateId(_)
                | Self::NotAMapping
        )
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_classified() {
        assert!(RetrievalError::EmptyInput.is_input_error());
        assert!(RetrievalError::shape("bad").is_input_error());
        assert!(
            RetrievalError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
            .is_input_error()
        );
        assert!(!RetrievalError::IndexNotFound(PathBuf::from("x")).is_input_error());
        assert!(!RetrievalError::corrupt("bad blob").is_input_error());
    }

    #[test]
    fn not_found_message_names_path() {
        let err = RetrievalError::IndexNotFound(PathBuf::from("/tmp/missing.db"));
        assert_eq!(err.to_string(), "index file not found: /tmp/missing.db");
    }
}
