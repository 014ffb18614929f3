//! transcript hashing and HKDF-SHA256 key derivation
//!
//! SPAKE2+ expands directly off the BLAKE2b transcript hash treated as a
//! 32-byte PRK, with no extract step; ECDHE+PSK runs a real extract keyed on
//! its own transcript hash first. both call through [`expand`]; only the
//! latter calls [`extract`]. see the derivation notes on the peers
//! themselves for which path each one takes and why.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use hkdf::{Hkdf, HkdfExtract};
use sha2::Sha256;

use crate::error::{Error, Result};

pub const HASH_LEN: usize = 32;
pub const KEY_LEN: usize = 32;

type Blake2b256 = Blake2b<U32>;

/// `BLAKE2b` natively parameterized for a 32-byte output, matching
/// libsodium's `crypto_generichash` configured for `crypto_kdf_hkdf_sha256_KEYBYTES`
/// (the output length is mixed into BLAKE2b's own parameter block, so this is
/// not the same function as a wider BLAKE2b run truncated afterward).
pub fn transcript_hash(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `HKDF-Extract(salt, ikm)` over SHA-256, producing a 32-byte PRK.
pub fn extract(salt: &[u8], ikm: &[u8]) -> [u8; HASH_LEN] {
    let mut extract_ctx = HkdfExtract::<Sha256>::new(Some(salt));
    extract_ctx.input_ikm(ikm);
    let (prk, _) = extract_ctx.finalize();
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&prk);
    out
}

/// `HKDF-Expand(prk, info)` over SHA-256, producing a 32-byte key.
pub fn expand(prk: &[u8; HASH_LEN], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::from_prk(prk).map_err(|e| Error::KdfFailed(e.to_string()))?;
    let mut out = [0u8; KEY_LEN];
    hk.expand(info, &mut out)
        .map_err(|e| Error::KdfFailed(e.to_string()))?;
    Ok(out)
}
