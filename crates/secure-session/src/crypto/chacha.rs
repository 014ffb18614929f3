//! counter-nonce chacha20-poly1305, used for handshake confirmation flights
//! and for per-session traffic that the transport delivers in order
//!
//! the encryptor pre-increments a 96-bit little-endian counter before each
//! message; the decryptor rejects any nonce that does not strictly increase,
//! which is what makes a replayed confirmation message fail rather than
//! silently re-confirm.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

fn cipher_from_key(key: &[u8; 32]) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new_from_slice(key).expect("32-byte key is always valid")
}

fn nonce_bytes(counter: u128) -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    bytes.copy_from_slice(&counter.to_le_bytes()[..NONCE_LEN]);
    bytes
}

/// encrypts a sequence of messages under one key, advancing a counter nonce.
pub struct Encryptor {
    cipher: ChaCha20Poly1305,
    counter: u128,
}

impl Encryptor {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: cipher_from_key(key),
            counter: 0,
        }
    }

    /// encrypt one message, returning `nonce(12) || ciphertext || tag(16)`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(Error::Overflow)?;
        let nonce = nonce_bytes(self.counter);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// decrypts a sequence of messages under one key, rejecting any nonce that
/// does not strictly increase over the last one accepted.
pub struct Decryptor {
    cipher: ChaCha20Poly1305,
    last_accepted: Option<u128>,
}

impl Decryptor {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: cipher_from_key(key),
            last_accepted: None,
        }
    }

    pub fn decrypt(&mut self, framed: &[u8]) -> Result<Vec<u8>> {
        if framed.len() < NONCE_LEN {
            return Err(Error::Malformed("ciphertext shorter than nonce".into()));
        }
        let (nonce_slice, ciphertext) = framed.split_at(NONCE_LEN);
        let mut nonce_buf = [0u8; 16];
        nonce_buf[..NONCE_LEN].copy_from_slice(nonce_slice);
        let nonce_value = u128::from_le_bytes(nonce_buf);
        if let Some(last) = self.last_accepted {
            if nonce_value <= last {
                return Err(Error::ReplayDetected);
            }
        }
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_slice), ciphertext)
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
        self.last_accepted = Some(nonce_value);
        Ok(plaintext)
    }
}

/// one-shot encrypt under an explicit nonce, used by the handshake steps that
/// manage their own single-message framing (confirmP/confirmV).
pub fn encrypt_once(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    Encryptor::new(key).encrypt(plaintext)
}

/// one-shot decrypt counterpart to [`encrypt_once`]; does not track replay
/// state since each handshake key is used for exactly one message.
pub fn decrypt_once(key: &[u8; 32], framed: &[u8]) -> Result<Vec<u8>> {
    if framed.len() < NONCE_LEN {
        return Err(Error::Malformed("ciphertext shorter than nonce".into()));
    }
    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    cipher_from_key(key)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| Error::DecryptionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [7u8; 32];
        let mut enc = Encryptor::new(&key);
        let mut dec = Decryptor::new(&key);
        let framed = enc.encrypt(b"hello").unwrap();
        assert_eq!(dec.decrypt(&framed).unwrap(), b"hello");
    }

    #[test]
    fn sequential_messages_all_decrypt() {
        let key = [3u8; 32];
        let mut enc = Encryptor::new(&key);
        let mut dec = Decryptor::new(&key);
        for i in 0..5u8 {
            let framed = enc.encrypt(&[i]).unwrap();
            assert_eq!(dec.decrypt(&framed).unwrap(), vec![i]);
        }
    }

    #[test]
    fn replayed_message_is_rejected() {
        let key = [9u8; 32];
        let mut enc = Encryptor::new(&key);
        let mut dec = Decryptor::new(&key);
        let first = enc.encrypt(b"one").unwrap();
        let second = enc.encrypt(b"two").unwrap();
        dec.decrypt(&second).unwrap();
        assert!(matches!(dec.decrypt(&first), Err(Error::ReplayDetected)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [1u8; 32];
        let mut enc = Encryptor::new(&key);
        let mut dec = Decryptor::new(&key);
        let mut framed = enc.encrypt(b"untampered").unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        assert!(dec.decrypt(&framed).is_err());
    }

    #[test]
    fn once_helpers_roundtrip() {
        let key = [5u8; 32];
        let framed = encrypt_once(&key, b"payload").unwrap();
        assert_eq!(decrypt_once(&key, &framed).unwrap(), b"payload");
    }
}
