//! Suite-dispatched AEAD seal and open
//!
//! All functions are pure - nonces must be provided by the caller. This
//! keeps nonce discipline at the call site where uniqueness is enforced.

use aes_gcm::{
    Aes128Gcm,
    aead::{Aead, KeyInit, Payload},
};
use chacha20poly1305::ChaCha20Poly1305;

use crate::error::CryptoError;
use crate::suite::{AeadAlgorithm, Ciphersuite};

/// Nonce size shared by both supported AEADs (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag size shared by both supported AEADs.
pub const TAG_LEN: usize = 16;

/// Encrypt with the suite AEAD.
///
/// Returns ciphertext with the 16-byte authentication tag appended.
///
/// # Errors
///
/// `InvalidKeyLength` if the key does not match the suite's AEAD key size.
///
/// # Security
///
/// The caller MUST never reuse a nonce under the same key. The associated
/// data is authenticated but not encrypted.
pub fn seal(
    suite: Ciphersuite,
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let payload = Payload { msg: plaintext, aad };
    match suite.aead() {
        AeadAlgorithm::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| {
                CryptoError::InvalidKeyLength { expected: suite.aead_key_len(), actual: key.len() }
            })?;
            let Ok(ciphertext) = cipher.encrypt(nonce.into(), payload) else {
                unreachable!("AES-128-GCM encryption cannot fail with valid inputs");
            };
            Ok(ciphertext)
        },
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
                CryptoError::InvalidKeyLength { expected: suite.aead_key_len(), actual: key.len() }
            })?;
            let Ok(ciphertext) = cipher.encrypt(nonce.into(), payload) else {
                unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
            };
            Ok(ciphertext)
        },
    }
}

/// Decrypt with the suite AEAD.
///
/// # Errors
///
/// - `InvalidKeyLength` if the key does not match the suite's AEAD key size
/// - `AuthenticationFailed` if the tag does not verify (tampered ciphertext,
///   wrong key, or wrong associated data)
pub fn open(
    suite: Ciphersuite,
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let payload = Payload { msg: ciphertext, aad };
    match suite.aead() {
        AeadAlgorithm::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| {
                CryptoError::InvalidKeyLength { expected: suite.aead_key_len(), actual: key.len() }
            })?;
            cipher.decrypt(nonce.into(), payload).map_err(|_| CryptoError::AuthenticationFailed)
        },
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
                CryptoError::InvalidKeyLength { expected: suite.aead_key_len(), actual: key.len() }
            })?;
            cipher.decrypt(nonce.into(), payload).map_err(|_| CryptoError::AuthenticationFailed)
        },
    }
}
