//! Davey Group Session Engine
//!
//! End-to-end encryption for realtime voice channels, built on an
//! MLS-style group: signed key packages, a ratchet tree of member keys,
//! and an epoch-based key schedule feeding per-sender media ratchets.
//!
//! # Architecture
//!
//! The engine is transport-free. A [`DaveSession`] is a pure state
//! machine per channel: the caller moves serialized key packages,
//! commits, and welcomes through whatever transport orders them, and
//! feeds the results back in. Commits are two-phase. Building one
//! stages the next epoch without applying it; the transport's echo (or
//! an explicit merge) moves the group forward, so a session never
//! diverges from members that saw a different commit win the race.
//!
//! Media frames ride a separate data path. Each epoch's secret expands
//! into per-sender ratchets, and every frame is sealed with a one-time
//! key, so losing a frame never stalls decryption of the next one.
//!
//! # Components
//!
//! - [`DaveSession`]: per-channel facade over group, identity, and media
//! - [`group`]: membership state machine, commits, and epoch secrets
//! - [`key_package`]: signed join credentials and their validation
//! - [`media`]: frame encryption, per-sender decryption, passthrough
//! - [`verification`]: key fingerprints and displayable codes
//! - [`GroupConfig`]: capacity, epoch retention, and passthrough limits
//! - [`errors`]: one error enum per operation family
//!
//! # Security
//!
//! A commit seals fresh entropy to current members only, so each epoch
//! heals earlier key compromise, and removed members cannot read
//! anything after the epoch that drops them. Frame keys are one-time
//! and zeroized after use. Identity rests on Ed25519 signing keys;
//! members compare them out of band through the codes in
//! [`verification`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod session;
mod snapshot;
mod tree;

pub mod config;
pub mod errors;
pub mod group;
pub mod key_package;
pub mod media;
pub mod verification;

pub use config::GroupConfig;
pub use davey_crypto::{Ciphersuite, CryptoError, SigningKeyPair};
pub use errors::{
    CodeError, CommitError, DecryptError, EncryptError, FingerprintError, KeyPackageError,
    ProposalError, SessionError, SnapshotError, TreeError, VerificationError, WelcomeError,
};
pub use group::{CommitEffect, CommitMessages};
pub use key_package::{KeyPackage, KeyPackageBundle};
pub use media::{Codec, DecryptionStats, EncryptionStats, MediaType};
pub use session::{DaveSession, FingerprintPair, SessionStatus};
