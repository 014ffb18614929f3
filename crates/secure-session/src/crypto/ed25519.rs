//! scalar/point arithmetic on edwards25519, used by the SPAKE2+ peer
//!
//! wraps `curve25519-dalek`'s Edwards group directly (not Ristretto: the
//! SPAKE2+-draft `M`/`N` constants are classical Curve25519/Ed25519 points,
//! and the reference derivation multiplies by the cofactor explicitly rather
//! than relying on a prime-order group abstraction to absorb it).

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar as DalekScalar;
use rand_core::{CryptoRng, RngCore};

use crate::error::{Error, Result};

/// the fixed SPAKE2+-draft generator `M`, used on the password-holder (prover) side.
pub const M_BYTES: [u8; 32] = [
    0xd0, 0x48, 0x03, 0x2c, 0x6e, 0xa0, 0xb6, 0xd6, 0x97, 0xdd, 0xc2, 0xe8, 0x6b, 0xda, 0x85, 0xa3,
    0x3a, 0xda, 0xc9, 0x20, 0xf1, 0xbf, 0x18, 0xe1, 0xb0, 0xc6, 0xd1, 0x66, 0xa5, 0xce, 0xcd, 0xaf,
];

/// the fixed SPAKE2+-draft generator `N`, used on the verifier side.
pub const N_BYTES: [u8; 32] = [
    0xd3, 0xbf, 0xb5, 0x18, 0xf4, 0x4f, 0x34, 0x30, 0xf2, 0x9d, 0x0c, 0x92, 0xaf, 0x50, 0x38, 0x65,
    0xa1, 0xed, 0x32, 0x81, 0xdc, 0x69, 0xb3, 0x5d, 0xd8, 0x68, 0xba, 0x85, 0xf8, 0x86, 0xc4, 0xab,
];

/// the edwards25519 cofactor, as a scalar so it composes with `Scalar` ops.
pub fn cofactor() -> Scalar {
    Scalar(DalekScalar::from(8u8))
}

/// a scalar in the prime-order subgroup's field (mod `l`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scalar(DalekScalar);

impl Scalar {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Scalar(DalekScalar::random(rng))
    }

    /// reduce a 64-byte (wide, unbiased) buffer modulo the group order. used
    /// to turn an Argon2id output half into a uniformly distributed scalar.
    pub fn reduce_wide(bytes: &[u8; 64]) -> Self {
        Scalar(DalekScalar::from_bytes_mod_order_wide(bytes))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Scalar(DalekScalar::from_bytes_mod_order(*bytes))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// the (no-clamp) public point `self * B` on the base point.
    pub fn base_point_mul(self) -> Point {
        Point(&self.0 * ED25519_BASEPOINT_POINT)
    }
}

impl std::ops::Mul<Point> for Scalar {
    type Output = Point;
    fn mul(self, rhs: Point) -> Point {
        Point(self.0 * rhs.0)
    }
}

impl std::ops::Mul<Scalar> for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

/// a point in the edwards25519 prime-order subgroup, wire-compatible with the
/// reference implementation's 32-byte compressed encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point(EdwardsPoint);

impl Point {
    pub fn base() -> Self {
        Point(ED25519_BASEPOINT_POINT)
    }

    /// a random point in the prime-order subgroup, used where only a
    /// plausible-looking point is needed (e.g. fake credentials) rather than
    /// one tied to a known discrete log.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Scalar::random(rng).base_point_mul()
    }

    /// decode and validate a compressed point: must be a canonical encoding
    /// of a point on the curve, and not the identity (a small-order element
    /// would let a malicious peer force a predictable shared secret).
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let point = CompressedEdwardsY(*bytes)
            .decompress()
            .ok_or(Error::InvalidPoint)?;
        if point.is_identity() {
            return Err(Error::InvalidPoint);
        }
        Ok(Point(point))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }
}

impl std::ops::Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point(self.0 - rhs.0)
    }
}

pub fn fixed_m() -> Point {
    Point::from_bytes(&M_BYTES).expect("M is a fixed valid point")
}

pub fn fixed_n() -> Point {
    Point::from_bytes(&N_BYTES).expect("N is a fixed valid point")
}
