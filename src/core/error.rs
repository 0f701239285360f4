use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Error raised by the embedded SQL engine, surfaced unmodified.
    #[error(transparent)]
    Engine(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object store '{0}' not found")]
    StoreNotFound(String),

    #[error("Database is at version {stored}, cannot open at older version {requested}")]
    VersionMismatch { requested: u32, stored: u32 },

    #[error("Read-only transaction: {0}")]
    ReadOnly(String),

    #[error("Transaction spans {0} object stores, name one explicitly")]
    AmbiguousStore(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl<T> From<std::sync::PoisonError<T>> for VaultError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
