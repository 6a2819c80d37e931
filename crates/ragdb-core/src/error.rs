use serde::Serialize;
use thiserror::Error;

use crate::types::SearchType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation failed: {message}")]
    Validation { message: String, id: Option<String> },

    #[error("Provider call failed: {0}")]
    TransientProvider(String),

    #[error("Embedding failed after {attempts} attempt(s): {message}")]
    Embedding { attempts: u32, message: String },

    #[error("Vector store error: {0}")]
    Store(String),

    #[error("Capacity misconfigured: {0}")]
    Capacity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{search_type} search failed: {source}")]
    Search {
        search_type: SearchType,
        #[source]
        source: Box<Error>,
    },

    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification of [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    Validation,
    TransientProvider,
    Embedding,
    Store,
    Capacity,
    NotFound,
    Search,
    Unavailable,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), id: None }
    }

    pub fn validation_for(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), id: Some(id.into()) }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::TransientProvider(_) => ErrorKind::TransientProvider,
            Self::Embedding { .. } => ErrorKind::Embedding,
            Self::Store(_) => ErrorKind::Store,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Search { .. } => ErrorKind::Search,
            Self::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// The id of the document, chunk or record the error concerns, if known.
    /// Wrapped search errors report the id of their source.
    pub fn offending_id(&self) -> Option<&str> {
        match self {
            Self::Validation { id, .. } => id.as_deref(),
            Self::NotFound(id) => Some(id),
            Self::Search { source, .. } => source.offending_id(),
            _ => None,
        }
    }

    /// Only transient provider/store failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
