//! Labeled HKDF for the epoch key schedule
//!
//! All schedule derivations go through [`expand_with_label`] so every
//! derived value is domain-separated by a protocol label and bound to its
//! context bytes. Same inputs always produce the same output.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::secret::Secret;

/// Protocol prefix folded into every expansion label.
const LABEL_PREFIX: &[u8] = b"davey10 ";

/// Output size of the suite hash in bytes.
pub const EXTRACT_LEN: usize = 32;

/// HKDF-Extract with SHA-256.
///
/// Produces a 32-byte pseudorandom key from arbitrary-length salt and
/// input key material.
#[must_use]
pub fn extract(salt: &[u8], ikm: &[u8]) -> Secret {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    Secret::from_slice(&prk)
}

/// HKDF-Expand with a domain-separating label.
///
/// The info parameter is built as:
/// - bytes 0-1: output length (big-endian)
/// - byte 2: label length
/// - label: `"davey10 "` followed by the caller's label
/// - 4 bytes: context length (big-endian)
/// - context bytes
///
/// # Errors
///
/// `InvalidDeriveLength` if `out_len` exceeds what HKDF-SHA256 can produce
/// (255 * 32 bytes).
pub fn expand_with_label(
    prk: &Secret,
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Result<Secret, CryptoError> {
    // INVARIANT: prk is always an extract() output in this crate
    debug_assert_eq!(prk.len(), EXTRACT_LEN, "PRK must be an extract output");

    let Ok(hkdf) = Hkdf::<Sha256>::from_prk(prk.as_slice()) else {
        unreachable!("a {EXTRACT_LEN}-byte extract output is a valid PRK");
    };

    let full_label_len = LABEL_PREFIX.len() + label.len();
    debug_assert!(full_label_len <= u8::MAX as usize, "label too long");

    let mut info = Vec::with_capacity(2 + 1 + full_label_len + 4 + context.len());
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push(full_label_len as u8);
    info.extend_from_slice(LABEL_PREFIX);
    info.extend_from_slice(label);
    info.extend_from_slice(&(context.len() as u32).to_be_bytes());
    info.extend_from_slice(context);

    let mut out = vec![0u8; out_len];
    hkdf.expand(&info, &mut out)
        .map_err(|_| CryptoError::InvalidDeriveLength { requested: out_len })?;

    Ok(Secret::new(out))
}

/// Derive a hash-sized secret from a PRK under a label with empty context.
///
/// Convenience wrapper over [`expand_with_label`] for the common schedule
/// step.
#[must_use]
pub fn derive_secret(prk: &Secret, label: &[u8]) -> Secret {
    let Ok(secret) = expand_with_label(prk, label, &[], EXTRACT_LEN) else {
        unreachable!("a hash-sized expansion from a valid PRK cannot fail");
    };
    secret
}
