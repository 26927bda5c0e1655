use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared across the store, ingestion, and query layers.
///
/// Mirrors the error-kind taxonomy in the design: `InvalidArgument` and
/// `NotFound` are caller mistakes the HTTP layer maps to 4xx, `Storage`
/// wraps anything coming out of SQLite.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream error: {0}")]
    Upstream(String),
}
