//! Crypto errors

use tessera_core::ProtocolError;

/// Errors raised by cryptographic primitives
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext could not be authenticated or decrypted
    #[error("Decryption failed: {reason}")]
    Decryption {
        /// Cause of the failure
        reason: String,
    },

    /// Plaintext could not be encrypted
    #[error("Encryption failed: {reason}")]
    Encryption {
        /// Cause of the failure
        reason: String,
    },

    /// Bytes do not encode a valid prime-order point
    #[error("Invalid point encoding")]
    InvalidPoint,

    /// Bytes do not encode a canonical scalar
    #[error("Invalid scalar encoding")]
    InvalidScalar,

    /// HKDF expansion failed
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Cause of the failure
        reason: String,
    },

    /// Interpolation inputs were unusable
    #[error("Interpolation failed: {reason}")]
    Interpolation {
        /// Cause of the failure
        reason: String,
    },

    /// Key bytes rejected by the signature scheme
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Cause of the failure
        reason: String,
    },

    /// Signature did not verify
    #[error("Invalid signature")]
    InvalidSignature,
}

impl From<CryptoError> for ProtocolError {
    fn from(err: CryptoError) -> Self {
        ProtocolError::crypto(err.to_string())
    }
}
