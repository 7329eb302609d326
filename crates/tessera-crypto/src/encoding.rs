//! Point and scalar encodings
//!
//! Points travel as 32-byte compressed Edwards-Y encodings and must decode
//! into the prime-order subgroup; scalars travel as canonical little-endian
//! 32-byte values.

use crate::error::CryptoError;
use crate::{POINT_SIZE, SCALAR_SIZE};
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::{EdwardsPoint, Scalar};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// Encode a point in compressed form
pub fn encode_point(point: &EdwardsPoint) -> [u8; POINT_SIZE] {
    point.compress().to_bytes()
}

/// Decode a compressed point, rejecting points with a torsion component
pub fn decode_point(bytes: &[u8; POINT_SIZE]) -> Result<EdwardsPoint, CryptoError> {
    let point = CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or(CryptoError::InvalidPoint)?;

    if !point.is_torsion_free() {
        return Err(CryptoError::InvalidPoint);
    }

    Ok(point)
}

/// Encode a scalar canonically
pub fn encode_scalar(scalar: &Scalar) -> [u8; SCALAR_SIZE] {
    scalar.to_bytes()
}

/// Decode a canonical scalar
pub fn decode_scalar(bytes: &[u8; SCALAR_SIZE]) -> Result<Scalar, CryptoError> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes)).ok_or(CryptoError::InvalidScalar)
}

/// Sample a uniformly random scalar
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}
