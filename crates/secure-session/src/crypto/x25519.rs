//! X25519 Diffie-Hellman for the ECDHE+PSK resumption handshake
//!
//! unlike [`crate::crypto::ed25519`] this is Montgomery-ladder scalar
//! multiplication on the birationally-equivalent curve, matching the
//! reference implementation's use of `crypto_kx`/`crypto_scalarmult`
//! rather than the Edwards point operations SPAKE2+ needs.

use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;

pub const PUBLIC_KEY_LEN: usize = 32;

/// an X25519 keypair, generated with libsodium's `crypto_kx_keypair` clamping
/// semantics reproduced via `clamp_integer`.
pub struct Keypair {
    secret: Scalar,
    pub public: [u8; PUBLIC_KEY_LEN],
}

impl Keypair {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let secret = Scalar::from_bytes_mod_order(curve25519_dalek::scalar::clamp_integer(seed));
        let public = (curve25519_dalek::constants::X25519_BASEPOINT * secret).to_bytes();
        Keypair { secret, public }
    }

    /// the X25519 shared secret `Z = x · peer_public`.
    pub fn diffie_hellman(&self, peer_public: &[u8; PUBLIC_KEY_LEN]) -> [u8; 32] {
        (MontgomeryPoint(*peer_public) * self.secret).to_bytes()
    }
}
