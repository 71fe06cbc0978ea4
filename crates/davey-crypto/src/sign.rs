//! Ed25519 identity key pairs and signature verification

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};

use crate::error::CryptoError;

/// Ed25519 public key size in bytes.
pub const SIGNATURE_KEY_LEN: usize = 32;

/// Ed25519 signature size in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// A long-lived Ed25519 identity key pair.
///
/// Signs key packages and commit contents. A session without one can still
/// observe state derived from others but cannot author authenticated
/// updates.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { signing_key: SigningKey::generate(rng) }
    }

    /// Rebuild a key pair from a 32-byte private seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; SIGNATURE_KEY_LEN]) -> Self {
        Self { signing_key: SigningKey::from_bytes(seed) }
    }

    /// Rebuild a key pair from raw private and public halves.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` when either half has the wrong size
    /// - `InvalidPublicKey` when the public half does not belong to the
    ///   private half
    pub fn from_raw(private: &[u8], public: &[u8]) -> Result<Self, CryptoError> {
        let seed: &[u8; SIGNATURE_KEY_LEN] = private.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: SIGNATURE_KEY_LEN, actual: private.len() }
        })?;
        if public.len() != SIGNATURE_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: SIGNATURE_KEY_LEN,
                actual: public.len(),
            });
        }

        let signing_key = SigningKey::from_bytes(seed);
        if signing_key.verifying_key().as_bytes() != public {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Self { signing_key })
    }

    /// Public half of the key pair.
    #[must_use]
    pub fn public_key(&self) -> [u8; SIGNATURE_KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message, returning the detached signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKeyPair({})", hex_prefix(&self.public_key()))
    }
}

/// Short hex prefix of a public key for log readability.
fn hex_prefix(key: &[u8; SIGNATURE_KEY_LEN]) -> String {
    key.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Verify a detached Ed25519 signature.
///
/// Uses strict verification, rejecting the malleable edge cases the
/// looser RFC 8032 check accepts.
///
/// # Errors
///
/// - `InvalidPublicKey` when the public key bytes do not decode
/// - `InvalidSignature` when the signature is malformed or does not verify
pub fn verify_signature(public: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let verifying_key =
        VerifyingKey::try_from(public).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
