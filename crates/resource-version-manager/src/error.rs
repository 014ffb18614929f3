//! error taxonomy for the resource version manager

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("resource is already up to date")]
    NotModified,

    #[error("writer is not up to date with the resource")]
    Conflict,

    #[error("resource is locked by another caller")]
    Locked,
}
