//! Out-of-band identity verification.
//!
//! Two members confirm they see the same group by comparing short decimal
//! codes over a channel the server does not control (reading them aloud,
//! a QR code). Everything here is a pure function of its inputs so codes
//! can be recomputed and compared without a live session.
//!
//! # Derivation
//!
//! ```text
//! signature key ──> key fingerprint ──┐
//!                                     ├─> pairwise fingerprint ─> verification code
//! signature key ──> key fingerprint ──┘        (scrypt)             (45 digits)
//!
//! epoch authenticator ────────────────────────────────────────> privacy code
//!                                                                (30 digits)
//! ```
//!
//! # Security
//!
//! The pairwise step runs scrypt over the sorted fingerprint pair, which
//! slows brute-force searches for a second key pair that collides on a
//! short code. The displayable encoding keeps 10^45 and 10^30 code
//! spaces for the two code lengths.

use sha2::{Digest, Sha256};

use crate::errors::{CodeError, FingerprintError};

/// Fingerprint format version produced by current sessions.
pub const FINGERPRINT_FORMAT_VERSION: u16 = 1;

/// Largest supported fingerprint truncation length in bytes.
pub const MAX_FINGERPRINT_LEN: usize = 32;

/// Length of a pairwise fingerprint in bytes.
pub const PAIRWISE_FINGERPRINT_LEN: usize = 64;

/// Digits in a member verification code.
pub const VERIFICATION_CODE_DIGITS: usize = 45;

/// Digits in a voice privacy code.
pub const PRIVACY_CODE_DIGITS: usize = 30;

/// Digits consumed per group when formatting displayable codes.
pub const CODE_GROUP_DIGITS: usize = 5;

/// Largest digit group a single 64-bit accumulator can carry.
const MAX_CODE_GROUP: usize = 8;

/// scrypt cost parameter log2(N) for pairwise fingerprints.
const SCRYPT_LOG_N: u8 = 14;

/// scrypt block size parameter for pairwise fingerprints.
const SCRYPT_R: u32 = 8;

/// scrypt parallelism parameter for pairwise fingerprints.
const SCRYPT_P: u32 = 2;

/// Domain separation prefix for key fingerprints.
const FINGERPRINT_LABEL: &[u8] = b"davey10 fingerprint";

/// Computes a truncated fingerprint of a public key.
///
/// The digest is SHA-256 over the domain label, the big-endian format
/// version, and the key bytes. Both registered ciphersuites share
/// SHA-256, so the output is comparable across suites.
///
/// # Errors
///
/// - [`FingerprintError::UnsupportedVersion`] if `version` is zero.
/// - [`FingerprintError::EmptyKey`] if `key` is empty.
/// - [`FingerprintError::InvalidLength`] if `truncate_len` is zero or
///   exceeds [`MAX_FINGERPRINT_LEN`].
pub fn generate_key_fingerprint(
    version: u16,
    key: &[u8],
    truncate_len: usize,
) -> Result<Vec<u8>, FingerprintError> {
    if version == 0 {
        return Err(FingerprintError::UnsupportedVersion { version });
    }
    if key.is_empty() {
        return Err(FingerprintError::EmptyKey);
    }
    if truncate_len == 0 || truncate_len > MAX_FINGERPRINT_LEN {
        return Err(FingerprintError::InvalidLength {
            requested: truncate_len,
            max: MAX_FINGERPRINT_LEN,
        });
    }

    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_LABEL);
    hasher.update(version.to_be_bytes());
    hasher.update(key);
    let digest = hasher.finalize();

    Ok(digest[..truncate_len].to_vec())
}

/// Combines two key fingerprints into an order-independent value.
///
/// The fingerprints are sorted byte-lexicographically before hashing, so
/// both members compute the same value no matter which side they pass
/// first. The concatenation feeds scrypt as both password and salt.
#[must_use]
pub fn pairwise_fingerprint(a: &[u8], b: &[u8]) -> [u8; PAIRWISE_FINGERPRINT_LEN] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut combined = Vec::with_capacity(lo.len() + hi.len());
    combined.extend_from_slice(lo);
    combined.extend_from_slice(hi);

    // Parameters and output length are compile-time constants that scrypt
    // accepts, so neither call can fail.
    let Ok(params) = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, PAIRWISE_FINGERPRINT_LEN)
    else {
        unreachable!("scrypt parameters are valid constants")
    };
    let mut out = [0u8; PAIRWISE_FINGERPRINT_LEN];
    let Ok(()) = scrypt::scrypt(&combined, &combined, &params, &mut out) else {
        unreachable!("output length is a valid constant")
    };
    out
}

/// Formats the leading bytes of `data` as decimal digit groups.
///
/// Each group of [`CODE_GROUP_DIGITS`] digits consumes `group_size`
/// bytes: the bytes are read as a little-endian integer and reduced
/// modulo `10^group_size`, then zero-padded. A total of `desired_length`
/// digits consumes `desired_length` input bytes.
///
/// # Errors
///
/// - [`CodeError::GroupSizeOutOfRange`] if `group_size` is zero or
///   larger than eight.
/// - [`CodeError::LengthNotMultiple`] if `desired_length` does not
///   divide into whole groups.
/// - [`CodeError::DataTooShort`] if `data` has fewer than
///   `desired_length` bytes.
pub fn generate_displayable_code(
    data: &[u8],
    desired_length: usize,
    group_size: usize,
) -> Result<String, CodeError> {
    if group_size == 0 || group_size > MAX_CODE_GROUP {
        return Err(CodeError::GroupSizeOutOfRange { group_size });
    }
    if desired_length % group_size != 0 {
        return Err(CodeError::LengthNotMultiple {
            length: desired_length,
            group_size,
        });
    }
    if data.len() < desired_length {
        return Err(CodeError::DataTooShort {
            len: data.len(),
            required: desired_length,
        });
    }

    let modulus = 10u64.pow(group_size as u32);
    let mut code = String::with_capacity(desired_length);
    for group in data[..desired_length].chunks_exact(group_size) {
        let value = group.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let digits = value % modulus;
        // Zero-pad each group to its full width.
        let mut group_str = digits.to_string();
        while group_str.len() < group_size {
            group_str.insert(0, '0');
        }
        code.push_str(&group_str);
    }
    Ok(code)
}

/// Derives the 45-digit verification code from a pairwise fingerprint.
///
/// # Errors
///
/// Returns [`CodeError::DataTooShort`] if `value` carries fewer than
/// [`VERIFICATION_CODE_DIGITS`] bytes.
pub fn session_code(value: &[u8]) -> Result<String, CodeError> {
    generate_displayable_code(value, VERIFICATION_CODE_DIGITS, CODE_GROUP_DIGITS)
}

/// Derives the 30-digit privacy code from an epoch authenticator.
///
/// # Errors
///
/// Returns [`CodeError::DataTooShort`] if `authenticator` carries fewer
/// than [`PRIVACY_CODE_DIGITS`] bytes.
pub fn privacy_code(authenticator: &[u8]) -> Result<String, CodeError> {
    generate_displayable_code(authenticator, PRIVACY_CODE_DIGITS, CODE_GROUP_DIGITS)
}
