//! Davey Cryptographic Primitives
//!
//! The primitive layer under the davey protocol engine. Everything here
//! is deterministic given caller-supplied randomness and knows nothing
//! about groups, epochs, or sessions; the only stateful type is the
//! frame ratchet, and its state is a single chain key.
//!
//! # Key Lifecycle
//!
//! The engine above feeds each epoch's encryption secret through this
//! crate on its way to individual frames:
//!
//! ```text
//! encryption secret (one per epoch)
//!        │ expand_with_label
//!        ▼
//! sender seed (one per member leaf)
//!        │ FrameRatchet
//!        ▼
//! frame key (one per frame, single use)
//!        │ suite AEAD
//!        ▼
//! sealed frame
//! ```
//!
//! A frame key never seals more than one frame. The ratchet wipes each
//! chain link as it steps past it, so capturing ratchet state mid-epoch
//! exposes nothing that was already sent.
//!
//! # Security
//!
//! - Both supported suites authenticate their ciphertext; a single
//!   flipped bit fails the AEAD open.
//! - Secret material lives in wrappers that zeroize on drop: [`Secret`],
//!   [`FrameKey`], and the private halves of the signing and sealed-box
//!   keys.
//! - A sealed box binds its ciphertext to both parties' public keys, so
//!   a box sealed for one recipient cannot be replayed to another.
//! - The HKDF info layout length-prefixes label and context, so no two
//!   derivation paths collide byte-for-byte.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod ratchet;
pub mod sealed_box;
pub mod secret;
pub mod sign;
pub mod suite;

pub use aead::{NONCE_LEN, TAG_LEN};
pub use error::CryptoError;
pub use kdf::{EXTRACT_LEN, derive_secret, expand_with_label, extract};
pub use ratchet::{FrameKey, FrameRatchet, MAX_SKIP};
pub use sealed_box::{SealedBox, X25519_KEY_LEN};
pub use secret::Secret;
pub use sign::{SIGNATURE_KEY_LEN, SIGNATURE_LEN, SigningKeyPair, verify_signature};
pub use suite::{
    AeadAlgorithm, Ciphersuite, HashAlgorithm, KemAlgorithm, SUITE_AES128GCM,
    SUITE_CHACHA20POLY1305, SUPPORTED_SUITES, SignatureAlgorithm,
};
