//! Ed25519 verification
//!
//! FROST-Ed25519 aggregates into a standard Ed25519 signature, so the group
//! public key verifies it like any single-signer key.

use crate::error::CryptoError;
use crate::{POINT_SIZE, SIGNATURE_SIZE};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Verify `signature` over `message` under `public_key`
pub fn verify_signature(
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
    public_key: &[u8; POINT_SIZE],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(public_key).map_err(|e| CryptoError::InvalidKey {
        reason: e.to_string(),
    })?;

    verifying_key
        .verify(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::InvalidSignature)
}
