//! cryptographic primitives shared by both authentication peers

pub mod argon2id;
pub mod chacha;
pub mod ed25519;
pub mod kdf;
pub mod x25519;
pub mod xchacha;
