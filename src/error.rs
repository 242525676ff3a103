use thiserror::Error;

/// Errors produced by the retrieval engine and its backend adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing credentials, unsupported provider, or a feature enabled without
    /// the backend it needs. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An embedding, vector, generation or rerank backend could not be reached
    /// or answered with an error status.
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: &'static str, message: String },

    /// The vector collection width differs from the embedding width and the
    /// deployment is not configured to recreate it.
    #[error(
        "Vector collection '{collection}' has dim={actual} but expected dim={expected}. \
         Set VECTOR_RECREATE_ON_DIM_MISMATCH=true to auto-recreate."
    )]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// A streamed line from the generation backend could not be parsed.
    #[error("Malformed upstream event: {0}")]
    MalformedUpstreamEvent(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lexical index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn backend(backend: &'static str, message: impl ToString) -> Self {
        Error::BackendUnavailable {
            backend,
            message: message.to_string(),
        }
    }

    /// Fatal deployment problems that callers must not paper over.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::DimensionMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_is_configuration() {
        let err = Error::DimensionMismatch {
            collection: "chunks".into(),
            expected: 384,
            actual: 768,
        };
        assert!(err.is_configuration());
        assert!(err.to_string().contains("dim=768"));
    }

    #[test]
    fn test_backend_unavailable_is_not_configuration() {
        let err = Error::backend("vector", "connection refused");
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("vector"));
    }
}
