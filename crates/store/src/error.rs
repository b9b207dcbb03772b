use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure surface of the persistence layer. Everything the embedded engine
/// can raise is folded into one type so callers see a single `Store` kind.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] redb::DatabaseError),

    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),

    #[error(transparent)]
    Table(#[from] redb::TableError),

    #[error(transparent)]
    Storage(#[from] redb::StorageError),

    #[error(transparent)]
    Commit(#[from] redb::CommitError),

    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}
