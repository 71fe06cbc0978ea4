//! Ciphersuite registry
//!
//! Binds the numeric suite ids carried on the wire to concrete primitives.
//! The registry is a const lookup with no mutable state; groups never
//! renegotiate primitives after creation, so adding a suite is a code
//! change, not a session operation.

use crate::error::CryptoError;

/// Suite id for DHKEM-X25519 / AES-128-GCM / SHA-256 / Ed25519.
///
/// Mandatory suite; the default for new sessions.
pub const SUITE_AES128GCM: u16 = 0x0001;

/// Suite id for DHKEM-X25519 / ChaCha20-Poly1305 / SHA-256 / Ed25519.
pub const SUITE_CHACHA20POLY1305: u16 = 0x0003;

/// Key encapsulation mechanism of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KemAlgorithm {
    /// Diffie-Hellman KEM over Curve25519
    DhKemX25519,
}

/// AEAD algorithm of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-128-GCM (16-byte key, 12-byte nonce, 16-byte tag)
    Aes128Gcm,
    /// ChaCha20-Poly1305 (32-byte key, 12-byte nonce, 16-byte tag)
    ChaCha20Poly1305,
}

/// Hash algorithm of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256 (32-byte digest)
    Sha256,
}

/// Signature algorithm of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// Ed25519 (32-byte public key, 64-byte signature)
    Ed25519,
}

/// A resolved ciphersuite: immutable id plus concrete primitives.
///
/// All members of a group share exactly one ciphersuite for the lifetime
/// of the group; changing it requires a new group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciphersuite {
    id: u16,
    kem: KemAlgorithm,
    aead: AeadAlgorithm,
    hash: HashAlgorithm,
    signature: SignatureAlgorithm,
}

/// All suites this build supports, in preference order.
pub const SUPPORTED_SUITES: [Ciphersuite; 2] = [
    Ciphersuite {
        id: SUITE_AES128GCM,
        kem: KemAlgorithm::DhKemX25519,
        aead: AeadAlgorithm::Aes128Gcm,
        hash: HashAlgorithm::Sha256,
        signature: SignatureAlgorithm::Ed25519,
    },
    Ciphersuite {
        id: SUITE_CHACHA20POLY1305,
        kem: KemAlgorithm::DhKemX25519,
        aead: AeadAlgorithm::ChaCha20Poly1305,
        hash: HashAlgorithm::Sha256,
        signature: SignatureAlgorithm::Ed25519,
    },
];

impl Ciphersuite {
    /// Resolve a wire suite id to its primitives.
    ///
    /// # Errors
    ///
    /// `UnsupportedSuite` for id 0 and any id outside the supported set.
    pub const fn resolve(suite_id: u16) -> Result<Self, CryptoError> {
        let mut i = 0;
        while i < SUPPORTED_SUITES.len() {
            if SUPPORTED_SUITES[i].id == suite_id {
                return Ok(SUPPORTED_SUITES[i]);
            }
            i += 1;
        }
        Err(CryptoError::UnsupportedSuite { suite_id })
    }

    /// The default suite for newly created sessions.
    #[must_use]
    pub const fn default_suite() -> Self {
        SUPPORTED_SUITES[0]
    }

    /// Wire id of this suite.
    #[must_use]
    pub const fn id(self) -> u16 {
        self.id
    }

    /// Key encapsulation mechanism.
    #[must_use]
    pub const fn kem(self) -> KemAlgorithm {
        self.kem
    }

    /// AEAD algorithm.
    #[must_use]
    pub const fn aead(self) -> AeadAlgorithm {
        self.aead
    }

    /// Hash algorithm.
    #[must_use]
    pub const fn hash(self) -> HashAlgorithm {
        self.hash
    }

    /// Signature algorithm.
    #[must_use]
    pub const fn signature(self) -> SignatureAlgorithm {
        self.signature
    }

    /// Digest size of the suite hash in bytes.
    #[must_use]
    pub const fn hash_len(self) -> usize {
        match self.hash {
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// AEAD key size in bytes.
    #[must_use]
    pub const fn aead_key_len(self) -> usize {
        match self.aead {
            AeadAlgorithm::Aes128Gcm => 16,
            AeadAlgorithm::ChaCha20Poly1305 => 32,
        }
    }

    /// AEAD nonce size in bytes. Both supported AEADs use 96-bit nonces.
    #[must_use]
    pub const fn aead_nonce_len(self) -> usize {
        12
    }

    /// AEAD authentication tag size in bytes.
    #[must_use]
    pub const fn aead_tag_len(self) -> usize {
        16
    }
}
