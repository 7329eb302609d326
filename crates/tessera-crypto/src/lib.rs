//! Cryptographic primitives for Tessera protocols
//!
//! Everything here works over the Ed25519 group so that key shares produced
//! by the DKG plug directly into FROST-Ed25519 signing:
//!
//! - **ephemeral**: per-peer ephemeral key pairs, ECDH shared secrets and
//!   ChaCha20-Poly1305 symmetric keys
//! - **polynomial**: secret polynomials and Lagrange interpolation
//! - **commitment**: Pedersen commitments and Feldman points for verifiable
//!   secret sharing
//! - **encoding**: canonical point/scalar encodings
//! - **signature**: Ed25519 verification of aggregated signatures
//! - **share**: the threshold key share handed from key generation to signing

#![forbid(unsafe_code)]

/// Canonical point and scalar encodings
pub mod encoding;

/// Crypto error type
pub mod error;

/// Ephemeral key agreement and symmetric encryption
pub mod ephemeral;

/// Secret polynomials and interpolation
pub mod polynomial;

/// Verifiable secret sharing commitments
pub mod commitment;

/// Ed25519 signature verification
pub mod signature;

/// Threshold key shares
pub mod share;

pub use commitment::{
    evaluate_points, feldman_points, pedersen_commitments, pedersen_generator,
    verify_feldman_share, verify_pedersen_share,
};
pub use encoding::{decode_point, decode_scalar, encode_point, encode_scalar, random_scalar};
pub use ephemeral::{KeyPair, PrivateKey, PublicKey, SymmetricKey};
pub use error::CryptoError;
pub use polynomial::{lagrange_interpolate, Polynomial};
pub use share::PrivateKeyShare;
pub use signature::verify_signature;

pub use curve25519_dalek::{EdwardsPoint, Scalar};

/// Size of a compressed point in bytes
pub const POINT_SIZE: usize = 32;

/// Size of a canonical scalar in bytes
pub const SCALAR_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;
