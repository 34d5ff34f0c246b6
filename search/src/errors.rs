use thiserror::Error;

/// How a store call failed; both stores subdivide the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Transport,
    NotFound,
    SchemaMismatch,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::Transport => "transport",
            StoreErrorKind::NotFound => "not_found",
            StoreErrorKind::SchemaMismatch => "schema_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("intent response failed validation: {0}")]
    IntentUnparseable(String),

    #[error("retrieval plan invalid: {0}")]
    PlanInvalid(String),

    #[error(transparent)]
    Embedding(#[from] toolhub_embedding::EmbeddingError),

    #[error("vector store {} error: {message}", kind.as_str())]
    VectorStore { kind: StoreErrorKind, message: String },

    #[error("document store {} error: {message}", kind.as_str())]
    DocumentStore { kind: StoreErrorKind, message: String },

    #[error("chat provider unavailable: {0}")]
    ChatUnavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{failed} of {total} sources failed")]
    PartialFailure { failed: usize, total: usize },

    #[error(transparent)]
    FatalConfig(#[from] toolhub_config::ConfigError),
}

impl SearchError {
    pub fn vector_transport(message: impl Into<String>) -> Self {
        SearchError::VectorStore { kind: StoreErrorKind::Transport, message: message.into() }
    }

    pub fn document_transport(message: impl Into<String>) -> Self {
        SearchError::DocumentStore { kind: StoreErrorKind::Transport, message: message.into() }
    }

    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::InputInvalid(_) => "INPUT_INVALID",
            SearchError::IntentUnparseable(_) => "INTENT_UNPARSEABLE",
            SearchError::PlanInvalid(_) => "PLAN_INVALID",
            SearchError::Embedding(e) => match e {
                toolhub_embedding::EmbeddingError::DimensionMismatch { .. } => {
                    "EMBEDDING_DIMENSION_MISMATCH"
                }
                _ => "EMBEDDING_UNAVAILABLE",
            },
            SearchError::VectorStore { .. } => "VECTOR_STORE_ERROR",
            SearchError::DocumentStore { .. } => "DOCUMENT_STORE_ERROR",
            SearchError::ChatUnavailable(_) => "CHAT_UNAVAILABLE",
            SearchError::Timeout(_) => "TIMEOUT",
            SearchError::PartialFailure { .. } => "PARTIAL_FAILURE",
            SearchError::FatalConfig(_) => "FATAL_CONFIG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SearchError::InputInvalid("x".into()).code(), "INPUT_INVALID");
        assert_eq!(
            SearchError::Timeout(std::time::Duration::from_secs(1)).code(),
            "TIMEOUT"
        );
        let err = SearchError::Embedding(
            toolhub_embedding::EmbeddingError::DimensionMismatch { expected: 4, actual: 2 },
        );
        assert_eq!(err.code(), "EMBEDDING_DIMENSION_MISMATCH");
    }
}
