//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from cryptographic primitive operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphersuite id is zero or not in the supported set
    #[error("unsupported ciphersuite: {suite_id:#06x}")]
    UnsupportedSuite {
        /// The rejected suite id
        suite_id: u16,
    },

    /// Key material has the wrong length for the selected primitive
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Public key bytes do not decode to a valid curve point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature bytes are malformed or verification failed
    #[error("invalid signature")]
    InvalidSignature,

    /// AEAD open failed (authentication tag mismatch)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Requested HKDF output length cannot be produced
    #[error("invalid derive length: {requested}")]
    InvalidDeriveLength {
        /// The rejected output length in bytes
        requested: usize,
    },

    /// Sealed box is too short to contain an encapsulated key
    #[error("sealed box truncated: {len} bytes")]
    SealedBoxTruncated {
        /// Total length of the malformed box
        len: usize,
    },

    /// Requested generation lies outside the chain's reachable window
    #[error("cannot reach generation {requested} from {current}")]
    RatchetTooFarBehind {
        /// Generation the chain currently stands at
        current: u32,
        /// Generation the caller asked for
        requested: u32,
    },

    /// Frame counter for this chain is exhausted
    #[error("frame chain exhausted at generation {current}")]
    GenerationOverflow {
        /// Final generation the chain reached
        current: u32,
    },
}

impl CryptoError {
    /// Whether the failure ends the operation for good.
    ///
    /// A ratchet that has fallen behind can catch up once the caller
    /// resynchronizes. Everything else means bad inputs or tampering
    /// and will fail the same way on a retry.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RatchetTooFarBehind { .. })
    }
}
