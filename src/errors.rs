use thiserror::Error;

/// Crate-wide error type for every fallible BLite operation.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("not found")]
    NotFound,

    #[error("duplicate key")]
    DuplicateKey,

    #[error("write-write conflict, retry the transaction")]
    Conflict,

    #[error("corruption detected: {0}")]
    Corrupt(String),

    #[error("document too large for a single page ({0} bytes)")]
    TooLarge(usize),

    #[error("incompatible file: {0}")]
    Incompatible(String),

    #[error("database file is locked by another process")]
    Locked,

    #[error("transaction already finalised")]
    Finalised,

    #[error("operation cancelled")]
    Cancelled,

    #[error("collection not found: {0}")]
    NoSuchCollection(String),

    #[error("index not found: {0}")]
    NoSuchIndex(String),

    #[error("database not found")]
    DatabaseNotFound,
}

pub type Result<T> = std::result::Result<T, DbError>;
