//! error taxonomy for the secure session layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid step in handshake state machine")]
    InvalidStep,

    #[error("procedure has been wasted by a prior failure")]
    Wasted,

    #[error("replay detected: nonce did not increase")]
    ReplayDetected,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("no resumption ticket for key index")]
    UnknownTicket,

    #[error("counter overflow")]
    Overflow,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    #[error("invalid curve point")]
    InvalidPoint,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal error: {0}")]
    Fatal(String),
}
