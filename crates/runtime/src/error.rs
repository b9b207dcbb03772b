//! Error taxonomy for the dispatch surface and the batch orchestrator.
//!
//! Kinds are stable strings suitable for user display and exit-code mapping;
//! everything diagnostic goes to the tracing subscriber instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chatcentral_archive::ArchiveError;
use chatcentral_store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidFormat,
    NotFound,
    Validation,
    Fetch,
    Timeout,
    NoContext,
    Precheck,
    Store,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidFormat => "InvalidFormat",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Validation => "Validation",
            ErrorKind::Fetch => "Fetch",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::NoContext => "NoContext",
            ErrorKind::Precheck => "Precheck",
            ErrorKind::Store => "Store",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_format() -> Self {
        Self::new(ErrorKind::InvalidFormat, "Invalid message format")
    }
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Store,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ArchiveError> for RuntimeError {
    fn from(err: ArchiveError) -> Self {
        let kind = match &err {
            ArchiveError::Validation(_) => ErrorKind::Validation,
            ArchiveError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            ArchiveError::Store(_) => ErrorKind::Store,
            ArchiveError::Zip(_) | ArchiveError::Codec(_) => ErrorKind::Validation,
            ArchiveError::Io(_) => ErrorKind::Store,
        };
        Self::new(kind, err.to_string())
    }
}
