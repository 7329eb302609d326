//! Secret polynomials and Lagrange interpolation
//!
//! A member's contribution to the group key is the constant term of a random
//! polynomial of degree equal to the dishonest threshold; shares are
//! evaluations at member indices.

use crate::encoding::random_scalar;
use crate::error::CryptoError;
use curve25519_dalek::Scalar;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeSet;
use std::fmt;
use tessera_core::MemberIndex;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Polynomial over the Ed25519 scalar field
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    /// Sample a random polynomial of the given degree
    pub fn random<R: RngCore + CryptoRng>(degree: usize, rng: &mut R) -> Self {
        let coefficients = (0..=degree).map(|_| random_scalar(rng)).collect();
        Self { coefficients }
    }

    /// Build a polynomial from explicit coefficients, lowest degree first
    pub fn from_coefficients(coefficients: Vec<Scalar>) -> Self {
        Self { coefficients }
    }

    /// Polynomial degree
    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Coefficients, lowest degree first
    pub fn coefficients(&self) -> &[Scalar] {
        &self.coefficients
    }

    /// Evaluate at `x` using Horner's method
    pub fn evaluate(&self, x: &Scalar) -> Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
    }

    /// Evaluate at a member's index
    pub fn evaluate_at(&self, member: MemberIndex) -> Scalar {
        self.evaluate(&Scalar::from(member.as_u64()))
    }
}

impl fmt::Debug for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Polynomial(degree = {}, <redacted>)", self.degree())
    }
}

/// Interpolate the polynomial through `points` and evaluate it at `x`.
///
/// With exactly `degree + 1` distinct points this recovers the polynomial's
/// value anywhere; evaluating at zero reconstructs the secret.
pub fn lagrange_interpolate(
    points: &[(MemberIndex, Scalar)],
    x: &Scalar,
) -> Result<Scalar, CryptoError> {
    if points.is_empty() {
        return Err(CryptoError::Interpolation {
            reason: "no points to interpolate".to_string(),
        });
    }

    let distinct: BTreeSet<MemberIndex> = points.iter().map(|(index, _)| *index).collect();
    if distinct.len() != points.len() {
        return Err(CryptoError::Interpolation {
            reason: "duplicate interpolation points".to_string(),
        });
    }

    let mut result = Scalar::ZERO;
    for (i, (index_i, value_i)) in points.iter().enumerate() {
        let x_i = Scalar::from(index_i.as_u64());
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;

        for (j, (index_j, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            let x_j = Scalar::from(index_j.as_u64());
            numerator *= x - x_j;
            denominator *= x_i - x_j;
        }

        result += value_i * numerator * denominator.invert();
    }

    Ok(result)
}
