//! random-nonce xchacha20-poly1305, used for post-handshake application
//! traffic on a Connection
//!
//! the 192-bit nonce is wide enough that sampling it from a CSPRNG per
//! message is safe for the lifetime of a session, so unlike [`crate::crypto::chacha`]
//! the decryptor here is stateless and tolerates reordered or retried
//! messages from the transport.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 24;

/// encrypts messages under one key, sampling a fresh random nonce each time.
pub struct Encryptor {
    cipher: XChaCha20Poly1305,
}

impl Encryptor {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new_from_slice(key).expect("32-byte key is always valid"),
        }
    }

    /// encrypt one message, returning `nonce(24) || ciphertext || tag(16)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// decrypts messages under one key. stateless: does not enforce ordering.
pub struct Decryptor {
    cipher: XChaCha20Poly1305,
}

impl Decryptor {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new_from_slice(key).expect("32-byte key is always valid"),
        }
    }

    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>> {
        if framed.len() < NONCE_LEN {
            return Err(Error::Malformed("ciphertext shorter than nonce".into()));
        }
        let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [4u8; 32];
        let enc = Encryptor::new(&key);
        let dec = Decryptor::new(&key);
        let framed = enc.encrypt(b"application data").unwrap();
        assert_eq!(dec.decrypt(&framed).unwrap(), b"application data");
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let key = [2u8; 32];
        let enc = Encryptor::new(&key);
        let a = enc.encrypt(b"same").unwrap();
        let b = enc.encrypt(b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn out_of_order_messages_both_decrypt() {
        let key = [8u8; 32];
        let enc = Encryptor::new(&key);
        let dec = Decryptor::new(&key);
        let first = enc.encrypt(b"first").unwrap();
        let second = enc.encrypt(b"second").unwrap();
        // decrypt second before first: stateless decryptor must not care
        assert_eq!(dec.decrypt(&second).unwrap(), b"second");
        assert_eq!(dec.decrypt(&first).unwrap(), b"first");
    }

    #[test]
    fn tampered_tag_fails() {
        let key = [6u8; 32];
        let enc = Encryptor::new(&key);
        let dec = Decryptor::new(&key);
        let mut framed = enc.encrypt(b"integrity").unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 1;
        assert!(dec.decrypt(&framed).is_err());
    }
}
