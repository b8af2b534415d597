//! Shared error type for the share pipeline.
//!
//! Only a subset of variants ever reaches a caller: encoder and cleanup
//! failures are recovered inside the pipeline and show up in logs only.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Not a recognizable image: {0}")]
    Decode(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("External encoder failed: {0}")]
    ExternalEncoder(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Resource limit: {0}")]
    ResourceLimit(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("History ledger error: {0}")]
    History(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShareError {
    /// Whether this error may surface to a caller as "could not produce a
    /// shareable file" (or a ledger failure).
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, ShareError::ExternalEncoder(_) | ShareError::Cleanup(_))
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;
