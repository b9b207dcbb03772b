use thiserror::Error;

use chatcentral_store::StoreError;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}
