//! Event-driven inference pipeline.
//!
//! intake → decode → fetch → decrypt → classify → persist → ack.
//! Failures are not retried in-process: the ingress turns them into a
//! negative acknowledgement and the broker redelivers.

pub mod envelope;
pub mod handler;

pub use envelope::*;
pub use handler::*;

use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::crypto::CryptoError;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed envelope or event. Redelivery cannot fix it.
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Journal entry not found: {0}")]
    NotFound(String),

    #[error("Decryption failed: {0}")]
    Authentication(#[from] CryptoError),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Classification failed: {0}")]
    Classification(String),
}

impl PipelineError {
    /// Whether the broker should redeliver the message.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::Validation(_) | PipelineError::NotFound(_))
    }

    /// Short machine-readable kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Authentication(_) => "authentication",
            PipelineError::Transient(_) => "transient",
            PipelineError::Classification(_) => "classification",
        }
    }
}

impl From<DatabaseError> for PipelineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { .. } => PipelineError::NotFound(err.to_string()),
            // Stored content that is not a blob is an integrity failure, like a bad tag
            DatabaseError::InvalidBlob(detail) => {
                PipelineError::Authentication(CryptoError::MalformedBlob(detail))
            }
            other => PipelineError::Transient(other.to_string()),
        }
    }
}

impl From<ClassifierError> for PipelineError {
    fn from(err: ClassifierError) -> Self {
        PipelineError::Classification(err.to_string())
    }
}
