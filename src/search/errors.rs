use serde::Serialize;

use crate::config::ConfigError;
use crate::search::embeddings::EmbeddingError;
use crate::search::metadata::MetadataError;
use crate::search::retriever::RetrievalError;

/// Shown when a search outlives its deadline or the store cancels the statement.
pub const TIMEOUT_MESSAGE: &str = "Search took too long. Please try a more specific query.";

/// Category of a failed search, reported to callers next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InvalidInput,
    Timeout,
    RateLimited,
    Unauthenticated,
    Unavailable,
    MalformedResponse,
}

#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{message}")]
    Timeout { message: String, details: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream authentication failed: {0}")]
    Unauthenticated(String),

    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected dependency response: {0}")]
    MalformedResponse(String),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::Configuration(_) => ErrorKind::Configuration,
            SearchError::InvalidInput(_) => ErrorKind::InvalidInput,
            SearchError::Timeout { .. } => ErrorKind::Timeout,
            SearchError::RateLimited(_) => ErrorKind::RateLimited,
            SearchError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            SearchError::Unavailable(_) => ErrorKind::Unavailable,
            SearchError::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }

    pub fn timeout(details: impl Into<String>) -> Self {
        SearchError::Timeout {
            message: TIMEOUT_MESSAGE.to_string(),
            details: details.into(),
        }
    }
}

impl From<EmbeddingError> for SearchError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Unauthenticated(msg) => SearchError::Unauthenticated(msg),
            EmbeddingError::RateLimited { message, .. } => SearchError::RateLimited(message),
            EmbeddingError::MalformedInput(msg) => SearchError::InvalidInput(msg),
            EmbeddingError::Timeout => SearchError::timeout("embedding request timed out"),
            EmbeddingError::Unavailable(msg) => SearchError::Unavailable(msg),
            err @ (EmbeddingError::MalformedResponse(_)
            | EmbeddingError::DimensionMismatch { .. }) => {
                SearchError::MalformedResponse(err.to_string())
            }
        }
    }
}

impl From<RetrievalError> for SearchError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Timeout(details) => SearchError::timeout(details),
            RetrievalError::MalformedParameters(msg) => {
                SearchError::Configuration(ConfigError::Invalid(msg))
            }
            RetrievalError::Unavailable(msg) => SearchError::Unavailable(msg),
            RetrievalError::MalformedResponse(msg) => SearchError::MalformedResponse(msg),
        }
    }
}

impl From<MetadataError> for SearchError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Timeout(details) => SearchError::timeout(details),
            MetadataError::Unavailable(msg) => SearchError::Unavailable(msg),
            MetadataError::MalformedResponse(msg) => SearchError::MalformedResponse(msg),
        }
    }
}
