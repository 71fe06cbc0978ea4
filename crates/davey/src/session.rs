//! Per-channel session facade over group state, identity, and media.
//!
//! [`DaveSession`] is the one type a caller holds per voice channel. It
//! owns the long-lived signing identity, at most one established group,
//! and the per-member media ratchets, and it sequences the handshake
//! around the transport:
//!
//! ```text
//!               create_key_package               process_welcome
//! Initializing ------------------> AwaitingMembers -----------> Ready
//!      |                                                          ^
//!      |                 create_group (founder)                   |
//!      +----------------------------------------------------------+
//!
//! Ready --commit_pending--> Rekeying --merge_pending_commit--> Ready
//!                                    \--discard_pending_commit-/
//! ```
//!
//! Commits are two-phase. [`DaveSession::commit_pending`] stages the
//! next epoch locally and returns serialized messages; nothing applies
//! until the transport confirms them, either by echoing the commit back
//! through [`DaveSession::process_commit`] or by an explicit
//! [`DaveSession::merge_pending_commit`].
//!
//! # Security
//!
//! The signing key pair never leaves the session and is absent from
//! exported snapshots. [`DaveSession::export_state`] serializes raw
//! epoch secrets, so the caller owns protecting the snapshot at rest,
//! and [`DaveSession::resume`] rejects snapshots whose leaf does not
//! belong to the supplied signing key.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use davey_crypto::{Ciphersuite, SigningKeyPair};
use rand::rngs::OsRng;

use crate::config::GroupConfig;
use crate::errors::{
    DecryptError, EncryptError, SessionError, SnapshotError, VerificationError, WelcomeError,
};
use crate::group::{CommitEffect, CommitMessages, Group};
use crate::key_package::{KeyPackage, KeyPackageBundle};
use crate::media::{
    self, Codec, DecryptionStats, Decryptor, EncryptionStats, Encryptor, MediaType,
};
use crate::snapshot::{SNAPSHOT_FORMAT_VERSION, SessionSnapshot};
use crate::verification::{
    self, FINGERPRINT_FORMAT_VERSION, MAX_FINGERPRINT_LEN, PAIRWISE_FINGERPRINT_LEN,
};

/// Observable lifecycle state of a [`DaveSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No group and no published key package.
    Initializing,
    /// A key package has been created and a welcome is awaited.
    AwaitingMembers,
    /// An established group with no commit of our own in flight.
    Ready,
    /// An established group with our own commit staged and unmerged.
    Rekeying,
    /// Closed. Every operation is rejected until reinit.
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initializing => "initializing",
            Self::AwaitingMembers => "awaiting members",
            Self::Ready => "ready",
            Self::Rekeying => "rekeying",
            Self::Closed => "closed",
        })
    }
}

/// Key fingerprints for both ends of one member pair.
///
/// Produced by [`DaveSession::fingerprint_pair`] for display in an
/// out-of-band comparison UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintPair {
    /// Fingerprint of our own signature key.
    pub local: Vec<u8>,
    /// Fingerprint of the remote member's signature key.
    pub remote: Vec<u8>,
}

/// End-to-end encryption session for one voice channel.
pub struct DaveSession {
    protocol_version: u16,
    user_id: u64,
    channel_id: u64,
    suite: Ciphersuite,
    signing: SigningKeyPair,
    config: GroupConfig,
    pending_bundle: Option<KeyPackageBundle>,
    group: Option<Group>,
    closed: bool,
    encryptors: HashMap<MediaType, Encryptor>,
    decryptors: HashMap<u64, Decryptor>,
    passthrough_default: bool,
}

impl DaveSession {
    /// Creates a session with a fresh transient signing key and default
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidProtocolVersion`] for version 0.
    pub fn new(protocol_version: u16, user_id: u64, channel_id: u64) -> Result<Self, SessionError> {
        Self::with_signing_key(
            protocol_version,
            user_id,
            channel_id,
            SigningKeyPair::generate(&mut OsRng),
        )
    }

    /// Creates a session around a caller-managed signing key, so the
    /// identity survives across sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidProtocolVersion`] for version 0.
    pub fn with_signing_key(
        protocol_version: u16,
        user_id: u64,
        channel_id: u64,
        signing: SigningKeyPair,
    ) -> Result<Self, SessionError> {
        Self::with_config(protocol_version, user_id, channel_id, signing, GroupConfig::default())
    }

    /// Creates a session with explicit limits.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidProtocolVersion`] for version 0.
    pub fn with_config(
        protocol_version: u16,
        user_id: u64,
        channel_id: u64,
        signing: SigningKeyPair,
        config: GroupConfig,
    ) -> Result<Self, SessionError> {
        if protocol_version == 0 {
            return Err(SessionError::InvalidProtocolVersion {
                version: protocol_version,
            });
        }
        tracing::debug!(protocol_version, user_id, channel_id, "session created");
        Ok(Self {
            protocol_version,
            user_id,
            channel_id,
            suite: Ciphersuite::default_suite(),
            signing,
            config,
            pending_bundle: None,
            group: None,
            closed: false,
            encryptors: HashMap::new(),
            decryptors: HashMap::new(),
            passthrough_default: false,
        })
    }

    /// Rebuilds a session from bytes produced by
    /// [`DaveSession::export_state`].
    ///
    /// The resumed session starts with fresh media ratchets and
    /// passthrough disabled; only group state is carried over.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::VersionMismatch`] for a different snapshot
    ///   format.
    /// - [`SnapshotError::Decode`] if the bytes do not decode, the group
    ///   state is inconsistent, or the snapshot belongs to a different
    ///   signing key.
    pub fn resume(snapshot: &[u8], signing: SigningKeyPair) -> Result<Self, SnapshotError> {
        let decoded: SessionSnapshot =
            ciborium::from_reader(snapshot).map_err(|e| SnapshotError::Decode {
                reason: e.to_string(),
            })?;
        if decoded.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_FORMAT_VERSION,
                found: decoded.format_version,
            });
        }
        if decoded.protocol_version == 0 {
            return Err(SnapshotError::Decode {
                reason: "protocol version zero".into(),
            });
        }
        let group = Group::from_snapshot(
            decoded.group,
            decoded.protocol_version,
            decoded.user_id,
            signing.public_key(),
        )?;
        tracing::info!(
            user_id = decoded.user_id,
            channel_id = decoded.channel_id,
            epoch = group.epoch(),
            "session resumed from snapshot"
        );
        Ok(Self {
            protocol_version: decoded.protocol_version,
            user_id: decoded.user_id,
            channel_id: decoded.channel_id,
            suite: group.suite(),
            signing,
            config: group.config().clone(),
            pending_bundle: None,
            group: Some(group),
            closed: false,
            encryptors: HashMap::new(),
            decryptors: HashMap::new(),
            passthrough_default: false,
        })
    }

    /// Protocol version the session negotiates.
    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Local user id.
    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Channel this session is bound to.
    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Ciphersuite identifier the session runs.
    pub fn ciphersuite_id(&self) -> u16 {
        self.suite.id()
    }

    /// Public half of the signing identity.
    pub fn signature_public_key(&self) -> [u8; 32] {
        self.signing.public_key()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        if self.closed {
            SessionStatus::Closed
        } else if let Some(group) = self.group.as_ref() {
            if group.has_pending_commit() {
                SessionStatus::Rekeying
            } else {
                SessionStatus::Ready
            }
        } else if self.pending_bundle.is_some() {
            SessionStatus::AwaitingMembers
        } else {
            SessionStatus::Initializing
        }
    }

    /// Whether an established group exists and the session is open.
    ///
    /// A rekeying session is still ready: the previous epoch stays
    /// usable until the staged commit merges.
    pub fn is_ready(&self) -> bool {
        !self.closed && self.group.is_some()
    }

    /// Current group epoch, if a group is established.
    pub fn epoch(&self) -> Option<u64> {
        self.group.as_ref().map(Group::epoch)
    }

    /// Our leaf index in the group, if a group is established.
    pub fn own_leaf_index(&self) -> Option<u32> {
        self.group.as_ref().map(Group::own_leaf_index)
    }

    /// Ids of all current members, in leaf order. Empty without a group.
    pub fn user_ids(&self) -> Vec<u64> {
        self.group.as_ref().map(Group::user_ids).unwrap_or_default()
    }

    /// Number of queued proposals awaiting [`DaveSession::commit_pending`].
    pub fn pending_proposal_count(&self) -> usize {
        self.group
            .as_ref()
            .map(Group::pending_proposal_count)
            .unwrap_or_default()
    }

    /// Serialized key package of the pending join, if one is outstanding.
    pub fn key_package_bytes(&self) -> Option<&[u8]> {
        self.pending_bundle.as_ref().map(KeyPackageBundle::serialized)
    }

    /// Generates a signed key package and returns its serialization for
    /// publication.
    ///
    /// Replaces any previously pending key package; a welcome can only
    /// be processed against the most recent one.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] on a closed session.
    /// - [`SessionError::KeyPackage`] if signing or encoding fails.
    pub fn create_key_package(&mut self) -> Result<Vec<u8>, SessionError> {
        self.ensure_open()?;
        let bundle = KeyPackageBundle::generate(
            self.protocol_version,
            self.suite,
            self.user_id,
            &self.signing,
            &mut OsRng,
        )?;
        let serialized = bundle.serialized().to_vec();
        self.pending_bundle = Some(bundle);
        tracing::debug!(user_id = self.user_id, "key package published");
        Ok(serialized)
    }

    /// Founds a single-member group for this channel at epoch 0.
    ///
    /// Any pending key package is dropped: the founder does not join
    /// through a welcome.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] on a closed session.
    /// - [`SessionError::GroupExists`] if a group is already established.
    pub fn create_group(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.group.is_some() {
            return Err(SessionError::GroupExists);
        }
        let group = Group::new_founding(
            self.suite,
            self.protocol_version,
            self.channel_id,
            self.user_id,
            self.signing.public_key(),
            self.config.clone(),
            &mut OsRng,
        );
        self.pending_bundle = None;
        self.group = Some(group);
        tracing::info!(
            user_id = self.user_id,
            channel_id = self.channel_id,
            "founded group"
        );
        Ok(())
    }

    /// Joins a group from a welcome addressed to our pending key
    /// package.
    ///
    /// The pending key package is consumed only on success, so a welcome
    /// for someone else leaves the join attempt intact.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] on a closed session.
    /// - [`SessionError::Welcome`] if no join is pending, a group
    ///   already exists, or the welcome fails validation.
    pub fn process_welcome(&mut self, welcome: &[u8]) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.group.is_some() {
            return Err(WelcomeError::GroupExists.into());
        }
        let Some(bundle) = self.pending_bundle.as_ref() else {
            return Err(WelcomeError::NoPendingJoin.into());
        };
        let group = Group::from_welcome(
            welcome,
            bundle,
            self.protocol_version,
            self.user_id,
            self.config.clone(),
        )?;
        tracing::info!(
            user_id = self.user_id,
            epoch = group.epoch(),
            members = group.member_count(),
            "joined group from welcome"
        );
        self.pending_bundle = None;
        self.group = Some(group);
        Ok(())
    }

    /// Queues the addition of a member from their serialized key
    /// package.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] / [`SessionError::NoGroup`] for
    ///   lifecycle violations.
    /// - [`SessionError::KeyPackage`] if the bytes do not decode.
    /// - [`SessionError::Proposal`] if the package fails validation or
    ///   the user is already present or queued.
    pub fn propose_add(&mut self, key_package: &[u8]) -> Result<(), SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        let package = KeyPackage::decode(key_package)?;
        group.queue_add(package)?;
        Ok(())
    }

    /// Queues the removal of the member with `user_id`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] / [`SessionError::NoGroup`] for
    ///   lifecycle violations.
    /// - [`SessionError::Proposal`] for an unknown user or an attempted
    ///   self-removal.
    pub fn propose_remove(&mut self, user_id: u64) -> Result<(), SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        group.queue_remove(user_id)?;
        Ok(())
    }

    /// Queues a rotation of our own leaf keys.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] / [`SessionError::NoGroup`] for
    ///   lifecycle violations.
    pub fn propose_self_update(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        group.queue_update();
        Ok(())
    }

    /// Builds a commit over all queued proposals and stages the next
    /// epoch.
    ///
    /// The returned commit goes to every member and the welcome, when
    /// present, to the added ones. The session stays on the current
    /// epoch until the commit is merged.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] / [`SessionError::NoGroup`] for
    ///   lifecycle violations.
    /// - [`SessionError::Commit`] if nothing is queued or a commit is
    ///   already staged.
    pub fn commit_pending(&mut self) -> Result<CommitMessages, SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        Ok(group.build_commit(&self.signing, &mut OsRng)?)
    }

    /// Adopts our staged commit after the transport confirmed it,
    /// returning the new epoch.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] / [`SessionError::NoGroup`] for
    ///   lifecycle violations.
    /// - [`SessionError::Commit`] if no commit is staged.
    pub fn merge_pending_commit(&mut self) -> Result<u64, SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        Ok(group.merge_pending_commit()?)
    }

    /// Drops our staged commit after the transport rejected it. The
    /// proposals behind it go back into the queue.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] / [`SessionError::NoGroup`] for
    ///   lifecycle violations.
    /// - [`SessionError::Commit`] if no commit is staged.
    pub fn discard_pending_commit(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        Ok(group.discard_pending_commit()?)
    }

    /// Applies a commit delivered by the transport.
    ///
    /// Recognizes our own staged commit echoed back and merges it. A
    /// commit that removes the local member tears the group down; the
    /// session returns to its pre-join state and keeps its identity.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] / [`SessionError::NoGroup`] for
    ///   lifecycle violations.
    /// - [`SessionError::Commit`] if the commit does not decode, targets
    ///   another epoch, or fails authentication.
    pub fn process_commit(&mut self, commit: &[u8]) -> Result<CommitEffect, SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        let effect = group.process_commit(commit)?;
        self.finish_commit(&effect);
        Ok(effect)
    }

    /// Applies a batch of commits for the same epoch, resolving the
    /// race by the lowest committer leaf.
    ///
    /// # Errors
    ///
    /// Same as [`DaveSession::process_commit`]; an empty batch is a
    /// decode error.
    pub fn process_commits(&mut self, commits: &[Vec<u8>]) -> Result<CommitEffect, SessionError> {
        self.ensure_open()?;
        let group = self.group.as_mut().ok_or(SessionError::NoGroup)?;
        let effect = group.process_commits(commits)?;
        self.finish_commit(&effect);
        Ok(effect)
    }

    /// Tears down media state that a merged commit invalidated.
    fn finish_commit(&mut self, effect: &CommitEffect) {
        if *effect == CommitEffect::RemovedSelf {
            tracing::info!(user_id = self.user_id, "removed from group");
            self.group = None;
            self.encryptors.clear();
            self.decryptors.clear();
        }
    }

    /// Authenticator of the current epoch, shared by all members.
    pub fn epoch_authenticator(&self) -> Option<Vec<u8>> {
        self.group
            .as_ref()
            .map(|group| group.epoch_authenticator().as_slice().to_vec())
    }

    /// Derives the 30-digit voice privacy code of the current epoch.
    ///
    /// Every member displays the same code; a mismatch means the members
    /// are not in the same cryptographic group.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::NoEstablishedGroup`] without a
    /// group.
    pub fn voice_privacy_code(&self) -> Result<String, VerificationError> {
        let group = self
            .group
            .as_ref()
            .ok_or(VerificationError::NoEstablishedGroup)?;
        Ok(verification::privacy_code(
            group.epoch_authenticator().as_slice(),
        )?)
    }

    /// Fingerprints of our own and a remote member's signature keys.
    ///
    /// # Errors
    ///
    /// - [`VerificationError::NoEstablishedGroup`] without a group.
    /// - [`VerificationError::UnknownUser`] if the user is not a member.
    /// - [`VerificationError::Fingerprint`] for an unsupported format
    ///   version.
    pub fn fingerprint_pair(
        &self,
        version: u16,
        user_id: u64,
    ) -> Result<FingerprintPair, VerificationError> {
        let group = self
            .group
            .as_ref()
            .ok_or(VerificationError::NoEstablishedGroup)?;
        let remote_key = group
            .signature_key_of_user(user_id)
            .ok_or(VerificationError::UnknownUser { user_id })?;
        let local = verification::generate_key_fingerprint(
            version,
            &self.signing.public_key(),
            MAX_FINGERPRINT_LEN,
        )?;
        let remote =
            verification::generate_key_fingerprint(version, &remote_key, MAX_FINGERPRINT_LEN)?;
        Ok(FingerprintPair { local, remote })
    }

    /// Slow pairwise fingerprint binding our identity to a remote
    /// member's.
    ///
    /// Symmetric: both sides compute the same value regardless of
    /// direction.
    ///
    /// # Errors
    ///
    /// Same as [`DaveSession::fingerprint_pair`].
    pub fn pairwise_fingerprint(
        &self,
        version: u16,
        user_id: u64,
    ) -> Result<[u8; PAIRWISE_FINGERPRINT_LEN], VerificationError> {
        let pair = self.fingerprint_pair(version, user_id)?;
        Ok(verification::pairwise_fingerprint(&pair.local, &pair.remote))
    }

    /// Derives the 45-digit verification code for comparing identities
    /// with one remote member out of band.
    ///
    /// # Errors
    ///
    /// Same as [`DaveSession::fingerprint_pair`].
    pub fn verification_code(&self, user_id: u64) -> Result<String, VerificationError> {
        let pairwise = self.pairwise_fingerprint(FINGERPRINT_FORMAT_VERSION, user_id)?;
        Ok(verification::session_code(&pairwise)?)
    }

    /// Encrypts one outbound media frame under the current epoch.
    ///
    /// Empty frames pass through unchanged. The codec is advisory; the
    /// whole frame is encrypted regardless.
    ///
    /// # Errors
    ///
    /// - [`EncryptError::NotReady`] without an established group.
    /// - [`EncryptError::Crypto`] if the sender ratchet is exhausted.
    pub fn encrypt(
        &mut self,
        media_type: MediaType,
        codec: Codec,
        frame: &[u8],
    ) -> Result<Vec<u8>, EncryptError> {
        let Some(group) = self.group.as_ref() else {
            return Err(EncryptError::NotReady);
        };
        tracing::trace!(?media_type, ?codec, len = frame.len(), "encrypting frame");
        let encryptor = self.encryptors.entry(media_type).or_default();
        encryptor.encrypt_frame(
            group.suite(),
            group.epoch_history().current(),
            group.own_leaf_index(),
            media_type,
            frame,
            &mut OsRng,
        )
    }

    /// Encrypts one Opus audio frame.
    ///
    /// # Errors
    ///
    /// Same as [`DaveSession::encrypt`].
    pub fn encrypt_opus(&mut self, frame: &[u8]) -> Result<Vec<u8>, EncryptError> {
        self.encrypt(MediaType::Audio, Codec::Opus, frame)
    }

    /// Decrypts one inbound media frame from `user_id`.
    ///
    /// Plain frames are forwarded while passthrough applies to this
    /// sender, even before a group exists or for senders that are not
    /// members yet. Protocol frames require the sender to be a member
    /// and their epoch to be retained.
    ///
    /// # Errors
    ///
    /// - [`DecryptError::NotReady`] for a protocol frame without a
    ///   group.
    /// - [`DecryptError::UnknownSender`] for a protocol frame from a
    ///   non-member.
    /// - [`DecryptError::UnknownEpoch`], [`DecryptError::MalformedFrame`],
    ///   [`DecryptError::DecryptionFailed`], or [`DecryptError::Crypto`]
    ///   from frame processing.
    pub fn decrypt(
        &mut self,
        user_id: u64,
        media_type: MediaType,
        frame: &[u8],
    ) -> Result<Vec<u8>, DecryptError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let passthrough_default = self.passthrough_default;
        let decryptor = self
            .decryptors
            .entry(user_id)
            .or_insert_with(|| Decryptor::new(passthrough_default));
        let Some(group) = self.group.as_ref() else {
            if media::is_protocol_frame(frame) {
                decryptor.record_failure(media_type);
                return Err(DecryptError::NotReady);
            }
            return decryptor.forward_plain(media_type, frame);
        };
        let Some(leaf) = group.sender_leaf(user_id) else {
            if media::is_protocol_frame(frame) {
                decryptor.record_failure(media_type);
                return Err(DecryptError::UnknownSender { user_id });
            }
            return decryptor.forward_plain(media_type, frame);
        };
        decryptor.decrypt_frame(group.suite(), group.epoch_history(), leaf, media_type, frame)
    }

    /// Encryption counters, for one media type or summed over all.
    pub fn encryption_stats(&self, media_type: Option<MediaType>) -> EncryptionStats {
        match media_type {
            Some(media_type) => self
                .encryptors
                .get(&media_type)
                .map(Encryptor::stats)
                .unwrap_or_default(),
            None => self
                .encryptors
                .values()
                .fold(EncryptionStats::default(), |acc, encryptor| {
                    acc.merged(encryptor.stats())
                }),
        }
    }

    /// Decryption counters for one sender, for one media type or summed
    /// over all.
    pub fn decryption_stats(&self, user_id: u64, media_type: Option<MediaType>) -> DecryptionStats {
        let Some(decryptor) = self.decryptors.get(&user_id) else {
            return DecryptionStats::default();
        };
        match media_type {
            Some(media_type) => decryptor.stats(media_type),
            None => decryptor
                .stats(MediaType::Audio)
                .merged(decryptor.stats(MediaType::Video)),
        }
    }

    /// Switches passthrough of unencrypted frames for all senders.
    ///
    /// Disabling opens a transition window, `transition_expiry` or the
    /// configured default, during which plain frames from previously
    /// allowed senders still pass. Senders first seen afterwards get the
    /// new mode without a window.
    pub fn set_passthrough_mode(&mut self, passthrough: bool, transition_expiry: Option<Duration>) {
        let window = transition_expiry.unwrap_or(self.config.passthrough_transition);
        let now = Instant::now();
        self.passthrough_default = passthrough;
        for decryptor in self.decryptors.values_mut() {
            decryptor.passthrough_mut().set(passthrough, window, now);
        }
        tracing::debug!(passthrough, ?window, "passthrough mode changed");
    }

    /// Whether a plain frame from `user_id` would currently pass.
    pub fn can_passthrough(&self, user_id: u64) -> bool {
        match self.decryptors.get(&user_id) {
            Some(decryptor) => decryptor.passthrough().allows(Instant::now()),
            None => self.passthrough_default,
        }
    }

    /// Drops the group, any pending join, and all media state, keeping
    /// the identity and configuration. Reopens a closed session.
    pub fn reset(&mut self) {
        tracing::debug!(user_id = self.user_id, "session reset");
        self.pending_bundle = None;
        self.group = None;
        self.encryptors.clear();
        self.decryptors.clear();
        self.closed = false;
    }

    /// Rebinds the session to a new version, user, and channel,
    /// dropping all group and media state.
    ///
    /// Passing no signing key generates a fresh transient one.
    /// Passthrough returns to disabled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidProtocolVersion`] for version 0,
    /// leaving the session untouched.
    pub fn reinit(
        &mut self,
        protocol_version: u16,
        user_id: u64,
        channel_id: u64,
        signing: Option<SigningKeyPair>,
    ) -> Result<(), SessionError> {
        if protocol_version == 0 {
            return Err(SessionError::InvalidProtocolVersion {
                version: protocol_version,
            });
        }
        self.reset();
        self.protocol_version = protocol_version;
        self.user_id = user_id;
        self.channel_id = channel_id;
        self.signing = signing.unwrap_or_else(|| SigningKeyPair::generate(&mut OsRng));
        self.passthrough_default = false;
        tracing::debug!(protocol_version, user_id, channel_id, "session reinitialized");
        Ok(())
    }

    /// Closes the session, wiping group and media state. A closed
    /// session rejects every operation until [`DaveSession::reset`] or
    /// [`DaveSession::reinit`].
    pub fn close(&mut self) {
        self.reset();
        self.closed = true;
        tracing::info!(user_id = self.user_id, channel_id = self.channel_id, "session closed");
    }

    /// Serializes the established group for a later
    /// [`DaveSession::resume`].
    ///
    /// In-flight state is not captured: queued proposals, a staged
    /// commit, a pending join, and media ratchets all start over after
    /// resumption. The output contains raw epoch secrets.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::NoEstablishedGroup`] without a group.
    /// - [`SnapshotError::Encode`] if serialization fails.
    pub fn export_state(&self) -> Result<Vec<u8>, SnapshotError> {
        let group = self.group.as_ref().ok_or(SnapshotError::NoEstablishedGroup)?;
        let snapshot = SessionSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            protocol_version: self.protocol_version,
            user_id: self.user_id,
            channel_id: self.channel_id,
            group: group.to_snapshot(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&snapshot, &mut bytes).map_err(|e| SnapshotError::Encode {
            reason: e.to_string(),
        })?;
        Ok(bytes)
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for DaveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaveSession")
            .field("user_id", &self.user_id)
            .field("channel_id", &self.channel_id)
            .field("protocol_version", &self.protocol_version)
            .field("status", &self.status())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DaveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user {} in channel {} ({})",
            self.user_id, self.channel_id, self.status()
        )?;
        if let Some(epoch) = self.epoch() {
            write!(f, " at epoch {epoch}")?;
        }
        Ok(())
    }
}
