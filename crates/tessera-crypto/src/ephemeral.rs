//! Ephemeral key agreement
//!
//! Members generate one ephemeral key pair per peer, exchange the public
//! halves over the broadcast channel and derive a pairwise symmetric key:
//!
//! ```text
//! shared  = ECDH(own private key, peer public key)
//! key     = HKDF-SHA256(shared, info = "tessera:v1:ephemeral-symmetric-key")
//! payload = nonce(12) || ChaCha20-Poly1305(key, nonce, plaintext)
//! ```
//!
//! ECDH is commutative, so both sides of a pair derive the same key
//! regardless of who computes first.

use crate::encoding::{decode_point, decode_scalar, encode_point, encode_scalar, random_scalar};
use crate::error::CryptoError;
use crate::{POINT_SIZE, SCALAR_SIZE};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use curve25519_dalek::{EdwardsPoint, Scalar};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SYMMETRIC_KEY_INFO: &[u8] = b"tessera:v1:ephemeral-symmetric-key";

/// Size of the ChaCha20-Poly1305 nonce prefixed to every ciphertext
pub const NONCE_SIZE: usize = 12;

/// Size of a derived symmetric key
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Ephemeral private key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(Scalar);

impl PrivateKey {
    /// Generate a fresh private key
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(random_scalar(rng))
    }

    /// Matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(EdwardsPoint::mul_base(&self.0))
    }

    /// Derive the symmetric key shared with the owner of `peer`
    pub fn ecdh(&self, peer: &PublicKey) -> Result<SymmetricKey, CryptoError> {
        let mut shared = encode_point(&(peer.0 * self.0));

        let hkdf = Hkdf::<Sha256>::new(None, &shared);
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        let expanded = hkdf.expand(SYMMETRIC_KEY_INFO, &mut key);
        shared.zeroize();

        expanded.map_err(|e| CryptoError::KeyDerivation {
            reason: format!("HKDF expansion failed: {e:?}"),
        })?;

        Ok(SymmetricKey(key))
    }

    /// Canonical encoding, used when the key is revealed as evidence
    pub fn to_bytes(&self) -> [u8; SCALAR_SIZE] {
        encode_scalar(&self.0)
    }

    /// Decode a revealed private key
    pub fn from_bytes(bytes: &[u8; SCALAR_SIZE]) -> Result<Self, CryptoError> {
        decode_scalar(bytes).map(Self)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Ephemeral public key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(EdwardsPoint);

impl PublicKey {
    /// Compressed encoding
    pub fn to_bytes(&self) -> [u8; POINT_SIZE] {
        encode_point(&self.0)
    }

    /// Decode a public key received from a peer
    pub fn from_bytes(bytes: &[u8; POINT_SIZE]) -> Result<Self, CryptoError> {
        decode_point(bytes).map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

/// Ephemeral key pair generated for exactly one peer
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// Private half, revealed only as accusation evidence
    pub private_key: PrivateKey,
    /// Public half, broadcast to the peer
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private_key = PrivateKey::generate(rng);
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

/// Pairwise symmetric key for authenticated encryption
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Encrypt `plaintext`, prefixing the random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encryption {
                reason: e.to_string(),
            })?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }

    /// Authenticate and decrypt a payload produced by [`SymmetricKey::encrypt`]
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < NONCE_SIZE {
            return Err(CryptoError::Decryption {
                reason: format!("payload of {} bytes is shorter than the nonce", payload.len()),
            });
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::Decryption {
                reason: e.to_string(),
            })
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}
