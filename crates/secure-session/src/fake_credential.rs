//! plausible fake verifiers for unknown usernames
//!
//! without this, a login attempt against a username that doesn't exist would
//! skip straight to a failure response while a real username pays the cost
//! of Argon2id plus the SPAKE2+ group operations — the timing difference (or
//! even just the error shape) leaks whether the username is registered. every
//! lookup through here costs the same as a real one and fails for the same
//! reason: a confirmation mismatch deep in the handshake, not a missing-user
//! error up front.

use lru::LruCache;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::num::NonZeroUsize;

use crate::crypto::ed25519::{Point, Scalar};
use crate::crypto::kdf;
use crate::spake2p::RegistrationResult;

const DEFAULT_CACHE_SIZE: usize = 10_000;
const SALT_LEN: usize = 16;

pub struct FakeCredentialGenerator {
    salt_prk: [u8; kdf::HASH_LEN],
    cache: Mutex<LruCache<String, RegistrationResult>>,
}

impl FakeCredentialGenerator {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        use rand::RngCore;
        let mut salt_prk = [0u8; kdf::HASH_LEN];
        OsRng.fill_bytes(&mut salt_prk);
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            salt_prk,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// a deterministic fake verifier for `username`: the salt is derived
    /// from a per-generator secret so repeated lookups for the same unknown
    /// username return the same salt (a real client would notice if it
    /// changed between attempts), while `w0`/`L` are cached after first use
    /// so a brute-forcing attacker can't use their instability to detect
    /// that the account is fake.
    pub fn get_fake_credential(&self, username: &str) -> RegistrationResult {
        if let Some(cached) = self.cache.lock().get(username) {
            return cached.clone();
        }
        let salt = self.derive_fake_salt(username);
        let w0 = Scalar::random(&mut OsRng);
        let l = Point::random(&mut OsRng);
        let result = RegistrationResult {
            w0: w0.to_bytes(),
            l: l.to_bytes(),
            salt,
        };
        self.cache.lock().put(username.to_string(), result.clone());
        result
    }

    /// splice a real user's salt into an otherwise-fake credential, used
    /// when a real account is locked out by the brute-force limiter: the
    /// salt must stay real so a client that previously completed the salt
    /// exchange for this username doesn't see it change.
    pub fn with_real_salt(&self, username: &str, real_salt: [u8; SALT_LEN]) -> RegistrationResult {
        let mut fake = self.get_fake_credential(username);
        fake.salt = real_salt;
        fake
    }

    fn derive_fake_salt(&self, username: &str) -> [u8; SALT_LEN] {
        let expanded = kdf::expand(&self.salt_prk, username.as_bytes())
            .expect("fixed-size expand cannot fail");
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&expanded[..SALT_LEN]);
        salt
    }
}

impl Default for FakeCredentialGenerator {
    fn default() -> Self {
        Self::new()
    }
}
