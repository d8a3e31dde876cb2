use thiserror::Error;

use crate::store::RecordKind;

#[derive(Debug, Error)]
pub enum TrackbitError {
    /// A required form field was missing or malformed. Nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{kind} `{id}` not found")]
    NotFound { kind: RecordKind, id: String },
    /// The record store could not be reached or refused the write.
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TrackbitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }
}

impl From<std::io::Error> for TrackbitError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackbitError>;
