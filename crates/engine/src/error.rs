//! The module contains the error the engine can throw.
//!
//! The errors fall in a few families:
//!
//! - [`Validation`] rejected input, never retried.
//! - [`KeyNotFound`] a referenced document does not exist.
//! - [`Conflict`] a write would create a document that already exists.
//! - [`Store`] and [`Database`] failures of the backing store; these are the
//!   only ones [`is_transient`] reports as worth retrying.
//!
//!  [`Validation`]: EngineError::Validation
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`Conflict`]: EngineError::Conflict
//!  [`Store`]: EngineError::Store
//!  [`Database`]: EngineError::Database
//!  [`is_transient`]: EngineError::is_transient
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("Document {0} already exists")]
    Conflict(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid date: \"{0}\"")]
    InvalidDate(String),
    #[error("Malformed document {id} in {collection}: {reason}")]
    MalformedDocument {
        collection: String,
        id: String,
        reason: String,
    },
    #[error("Batch limit of {0} operations exceeded")]
    BatchLimit(usize),
    #[error("Sequence exhausted for {0}: more than 9999 transactions in one year")]
    SequenceExhausted(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether retrying the same unit of work may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Database(_))
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::Conflict(a), Self::Conflict(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidDate(a), Self::InvalidDate(b)) => a == b,
            (
                Self::MalformedDocument {
                    collection: c1,
                    id: i1,
                    reason: r1,
                },
                Self::MalformedDocument {
                    collection: c2,
                    id: i2,
                    reason: r2,
                },
            ) => c1 == c2 && i1 == i2 && r1 == r2,
            (Self::BatchLimit(a), Self::BatchLimit(b)) => a == b,
            (Self::SequenceExhausted(a), Self::SequenceExhausted(b)) => a == b,
            (Self::Store(a), Self::Store(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            (Self::Serialization(a), Self::Serialization(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
