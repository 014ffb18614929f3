//! error taxonomy for the vector store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed on-disk file: {0}")]
    Malformed(String),

    #[error("vector has wrong dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal worker-thread error: {0}")]
    Fatal(String),
}
