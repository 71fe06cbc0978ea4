//! One-shot public-key encryption to an X25519 recipient
//!
//! Commits seal fresh path secrets to every other member, and welcomes
//! seal the joiner secret to a new member's key package. Both use this
//! construction: ephemeral X25519 agreement, HKDF to an AEAD key and
//! nonce, then the suite AEAD.
//!
//! # Security
//!
//! - A fresh ephemeral key per box; the nonce is derived, never reused
//!   across boxes because the ephemeral key differs
//! - The KEM context (both public keys) is folded into the derivation, so
//!   a box cannot be re-targeted to another recipient
//! - Low-order recipient points are rejected via the contributory check

use rand::{CryptoRng, RngCore};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::aead::{self, NONCE_LEN, TAG_LEN};
use crate::error::CryptoError;
use crate::kdf::{expand_with_label, extract};
use crate::suite::Ciphersuite;

/// X25519 public key size in bytes.
pub const X25519_KEY_LEN: usize = 32;

/// An encrypted payload addressed to a single X25519 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    /// Ephemeral sender public key for the agreement
    ephemeral_public: [u8; X25519_KEY_LEN],
    /// AEAD ciphertext including the authentication tag
    ciphertext: Vec<u8>,
}

impl SealedBox {
    /// Reassemble a box from its wire parts.
    #[must_use]
    pub fn from_parts(ephemeral_public: [u8; X25519_KEY_LEN], ciphertext: Vec<u8>) -> Self {
        Self { ephemeral_public, ciphertext }
    }

    /// Ephemeral public key carried with the box.
    #[must_use]
    pub fn ephemeral_public(&self) -> &[u8; X25519_KEY_LEN] {
        &self.ephemeral_public
    }

    /// Ciphertext including the authentication tag.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Flat wire encoding: ephemeral key followed by ciphertext.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(X25519_KEY_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the flat wire encoding.
    ///
    /// # Errors
    ///
    /// `SealedBoxTruncated` when the bytes cannot hold an ephemeral key
    /// and a tagged ciphertext.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < X25519_KEY_LEN + TAG_LEN {
            return Err(CryptoError::SealedBoxTruncated { len: bytes.len() });
        }
        let mut ephemeral_public = [0u8; X25519_KEY_LEN];
        ephemeral_public.copy_from_slice(&bytes[..X25519_KEY_LEN]);
        Ok(Self { ephemeral_public, ciphertext: bytes[X25519_KEY_LEN..].to_vec() })
    }
}

/// Seal a payload to a recipient public key.
///
/// # Errors
///
/// `InvalidPublicKey` when the agreement with the recipient key is
/// non-contributory (low-order point).
pub fn seal<R: RngCore + CryptoRng>(
    suite: Ciphersuite,
    recipient_public: &[u8; X25519_KEY_LEN],
    info: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<SealedBox, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(&mut *rng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_public));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let (key, nonce) =
        derive_box_key(suite, info, shared.as_bytes(), ephemeral_public.as_bytes(), recipient_public)?;

    let ciphertext = aead::seal(suite, key.as_slice(), &nonce, aad, plaintext)?;
    Ok(SealedBox { ephemeral_public: *ephemeral_public.as_bytes(), ciphertext })
}

/// Open a sealed box with the recipient's private key.
///
/// # Errors
///
/// - `InvalidPublicKey` when the embedded ephemeral key yields a
///   non-contributory agreement
/// - `AuthenticationFailed` when the box was tampered with or addressed
///   to a different key
pub fn open(
    suite: Ciphersuite,
    recipient_secret: &StaticSecret,
    info: &[u8],
    aad: &[u8],
    sealed: &SealedBox,
) -> Result<Vec<u8>, CryptoError> {
    let recipient_public = PublicKey::from(recipient_secret);
    let shared = recipient_secret.diffie_hellman(&PublicKey::from(sealed.ephemeral_public));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let (key, nonce) = derive_box_key(
        suite,
        info,
        shared.as_bytes(),
        &sealed.ephemeral_public,
        recipient_public.as_bytes(),
    )?;

    aead::open(suite, key.as_slice(), &nonce, aad, &sealed.ciphertext)
}

/// Derive the AEAD key and nonce for one box from the shared secret.
fn derive_box_key(
    suite: Ciphersuite,
    info: &[u8],
    shared: &[u8],
    ephemeral_public: &[u8; X25519_KEY_LEN],
    recipient_public: &[u8; X25519_KEY_LEN],
) -> Result<(crate::secret::Secret, [u8; NONCE_LEN]), CryptoError> {
    let mut kem_context = Vec::with_capacity(2 * X25519_KEY_LEN);
    kem_context.extend_from_slice(ephemeral_public);
    kem_context.extend_from_slice(recipient_public);

    let prk = extract(info, shared);
    let key = expand_with_label(&prk, b"sealed box key", &kem_context, suite.aead_key_len())?;
    let nonce_secret = expand_with_label(&prk, b"sealed box nonce", &kem_context, NONCE_LEN)?;

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_secret.as_slice());
    Ok((key, nonce))
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn recipient() -> (StaticSecret, [u8; X25519_KEY_LEN]) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = *PublicKey::from(&secret).as_bytes();
        (secret, public)
    }

    #[test]
    fn seal_open_round_trip() {
        let suite = Ciphersuite::default_suite();
        let (secret, public) = recipient();

        let sealed =
            seal(suite, &public, b"welcome", b"aad", b"joiner secret", &mut OsRng).unwrap();
        let opened = open(suite, &secret, b"welcome", b"aad", &sealed).unwrap();
        assert_eq!(opened, b"joiner secret");
    }

    #[test]
    fn wrong_recipient_fails_open() {
        let suite = Ciphersuite::default_suite();
        let (_, public) = recipient();
        let (other_secret, _) = recipient();

        let sealed = seal(suite, &public, b"info", b"", b"payload", &mut OsRng).unwrap();
        let result = open(suite, &other_secret, b"info", b"", &sealed);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn wrong_info_fails_open() {
        let suite = Ciphersuite::default_suite();
        let (secret, public) = recipient();

        let sealed = seal(suite, &public, b"commit path", b"", b"payload", &mut OsRng).unwrap();
        let result = open(suite, &secret, b"welcome", b"", &sealed);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn boxes_to_same_recipient_differ() {
        // Fresh ephemeral keys make sealing non-deterministic
        let suite = Ciphersuite::default_suite();
        let (_, public) = recipient();

        let a = seal(suite, &public, b"info", b"", b"payload", &mut OsRng).unwrap();
        let b = seal(suite, &public, b"info", b"", b"payload", &mut OsRng).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wire_round_trip() {
        let suite = Ciphersuite::default_suite();
        let (secret, public) = recipient();

        let sealed = seal(suite, &public, b"info", b"", b"payload", &mut OsRng).unwrap();
        let parsed = SealedBox::from_bytes(&sealed.to_bytes()).unwrap();
        assert_eq!(parsed, sealed);

        let opened = open(suite, &secret, b"info", b"", &parsed).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn truncated_wire_bytes_are_rejected() {
        let result = SealedBox::from_bytes(&[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::SealedBoxTruncated { len: 16 })));
    }
}
