//! Serialized session state for cold resume.
//!
//! A snapshot captures everything a session needs to rejoin its group
//! after a process restart without a fresh welcome: the member tree,
//! both transcript hashes, the retained epoch secrets, and the private
//! encryption key. In-flight state is deliberately absent; queued
//! proposals and staged commits must be rebuilt against live traffic,
//! and any commit for an epoch other than the snapshot's is rejected as
//! stale on resume.
//!
//! # Security
//!
//! Snapshots carry raw secret bytes. The encoding provides no
//! protection of its own; the caller owns encryption at rest and must
//! treat snapshot buffers like key material. The signing key is never
//! part of a snapshot and has to be supplied again on resume, where it
//! is checked against the resumed leaf.

use serde::{Deserialize, Serialize};

/// Format version written by [`crate::session::DaveSession::export_state`].
pub(crate) const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Top-level snapshot envelope.
#[derive(Serialize, Deserialize)]
pub(crate) struct SessionSnapshot {
    pub format_version: u16,
    pub protocol_version: u16,
    pub user_id: u64,
    pub channel_id: u64,
    pub group: GroupSnapshot,
}

/// Established-group state inside a snapshot.
#[derive(Serialize, Deserialize)]
pub(crate) struct GroupSnapshot {
    pub suite_id: u16,
    pub group_id: u64,
    pub epoch: u64,
    pub own_leaf: u32,
    pub slot_count: u32,
    pub leaves: Vec<LeafSnapshot>,
    pub confirmed_transcript_hash: Vec<u8>,
    pub interim_transcript_hash: Vec<u8>,
    pub own_encryption_secret: [u8; 32],
    pub epochs: Vec<EpochSnapshot>,
    pub max_members: usize,
    pub retained_epochs: usize,
    pub passthrough_transition_ms: u64,
}

/// One occupied leaf of the member tree.
#[derive(Serialize, Deserialize)]
pub(crate) struct LeafSnapshot {
    pub leaf_index: u32,
    pub user_id: u64,
    pub encryption_key: [u8; 32],
    pub signature_key: [u8; 32],
}

/// Derived secrets of one retained epoch.
#[derive(Serialize, Deserialize)]
pub(crate) struct EpochSnapshot {
    pub epoch: u64,
    pub authenticator: Vec<u8>,
    pub encryption_secret: Vec<u8>,
    pub confirmation_key: Vec<u8>,
    pub init_secret: Vec<u8>,
}
