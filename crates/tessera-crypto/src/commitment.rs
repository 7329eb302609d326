//! Verifiable secret sharing commitments
//!
//! Two commitment flavours are used over the Ed25519 group:
//!
//! - **Pedersen** `C_k = a_k·G + b_k·H`: hiding commitments to the secret
//!   polynomial `a` blinded by `b`, published before shares are verified.
//! - **Feldman** `A_k = a_k·G`: published once the qualified set is fixed, so
//!   public key shares can be derived and checked.
//!
//! `H` is derived by hashing to the curve, so nobody knows `log_G(H)`.

use crate::polynomial::Polynomial;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::traits::{Identity, IsIdentity};
use curve25519_dalek::{EdwardsPoint, Scalar};
use sha2::{Digest, Sha512};
use std::sync::OnceLock;
use tessera_core::MemberIndex;

const GENERATOR_TAG: &[u8] = b"tessera:v1:pedersen-generator-h";

static GENERATOR_H: OnceLock<EdwardsPoint> = OnceLock::new();

/// Second Pedersen generator `H`
pub fn pedersen_generator() -> EdwardsPoint {
    *GENERATOR_H.get_or_init(|| derive_generator(GENERATOR_TAG))
}

// Try-and-increment: hash the tag with a counter until the digest decodes to
// a curve point, then clear the cofactor.
fn derive_generator(tag: &[u8]) -> EdwardsPoint {
    let mut counter: u32 = 0;
    loop {
        let digest = Sha512::new()
            .chain_update(tag)
            .chain_update(counter.to_le_bytes())
            .finalize();

        let mut candidate = [0u8; 32];
        candidate.copy_from_slice(&digest[..32]);

        if let Some(point) = CompressedEdwardsY(candidate).decompress() {
            let point = point.mul_by_cofactor();
            if !point.is_identity() {
                return point;
            }
        }
        counter = counter.wrapping_add(1);
    }
}

/// Pedersen commitments to `secret` blinded by `blinding`
pub fn pedersen_commitments(secret: &Polynomial, blinding: &Polynomial) -> Vec<EdwardsPoint> {
    let h = pedersen_generator();
    secret
        .coefficients()
        .iter()
        .zip(blinding.coefficients())
        .map(|(a, b)| EdwardsPoint::mul_base(a) + h * b)
        .collect()
}

/// Feldman commitments to `secret`
pub fn feldman_points(secret: &Polynomial) -> Vec<EdwardsPoint> {
    secret
        .coefficients()
        .iter()
        .map(EdwardsPoint::mul_base)
        .collect()
}

/// Evaluate committed points "in the exponent": `Σ P_k · x^k`
pub fn evaluate_points(points: &[EdwardsPoint], member: MemberIndex) -> EdwardsPoint {
    let x = Scalar::from(member.as_u64());
    let mut power = Scalar::ONE;
    let mut sum = EdwardsPoint::identity();
    for point in points {
        sum += point * power;
        power *= x;
    }
    sum
}

/// Check `s·G + t·H == Σ C_k · j^k` for the share pair sent to `receiver`
pub fn verify_pedersen_share(
    commitments: &[EdwardsPoint],
    receiver: MemberIndex,
    share: &Scalar,
    blinding_share: &Scalar,
) -> bool {
    if commitments.is_empty() {
        return false;
    }
    let expected = evaluate_points(commitments, receiver);
    EdwardsPoint::mul_base(share) + pedersen_generator() * blinding_share == expected
}

/// Check `s·G == Σ A_k · j^k` for the share sent to `receiver`
pub fn verify_feldman_share(points: &[EdwardsPoint], receiver: MemberIndex, share: &Scalar) -> bool {
    if points.is_empty() {
        return false;
    }
    EdwardsPoint::mul_base(share) == evaluate_points(points, receiver)
}
