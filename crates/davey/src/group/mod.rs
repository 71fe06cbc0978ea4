//! Group state machine: membership, commits, and epoch transitions.
//!
//! A [`Group`] owns the ratchet tree, the transcript hashes, and the
//! retained epoch secrets for one voice channel. All transitions are
//! all-or-nothing: a commit is validated and staged against copies of
//! the state, and the live state is swapped only after every check has
//! passed. A failed transition leaves the previous epoch fully intact.
//!
//! # Commit flow
//!
//! ```text
//! queue_add/queue_remove/queue_update
//!        |
//!        v
//! build_commit ──> pending commit (staged next epoch) ──> merge_pending_commit
//!        |                                  |
//!        |                                  +──> discard_pending_commit
//!        v
//! commit + welcome bytes to the transport
//! ```
//!
//! Remote commits arrive through [`Group::process_commit`]. When a
//! remote commit races our own pending commit, the lower committer leaf
//! wins: every member evaluates the same rule, so the group converges
//! without coordination.
//!
//! # Security
//!
//! The committer seals the path entry secret individually to every
//! continuing member, so removed members cannot derive the next epoch.
//! Joiners receive the joiner secret instead and never learn the
//! previous epoch's init secret.

use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use tls_codec::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use davey_crypto::{
    Ciphersuite, CryptoError, Secret, SealedBox, X25519_KEY_LEN, sealed_box, verify_signature,
};

use crate::config::GroupConfig;
use crate::errors::{CommitError, ProposalError, SnapshotError, TreeError, WelcomeError};
use crate::key_package::{KeyPackage, KeyPackageBundle};
use crate::snapshot::{EpochSnapshot, GroupSnapshot, LeafSnapshot};
use crate::tree::{LeafNode, RatchetTree};

pub mod schedule;
pub mod wire;

use schedule::{EpochHistory, EpochSecrets, confirmation_tag, joiner_secret, verify_confirmation_tag};
use wire::{
    Commit, CommitContent, EncryptedGroupSecrets, GroupContext, GroupSecrets, PathSecretCiphertext,
    Proposal, UpdatePath, Welcome, WelcomeLeaf,
};

/// Domain separation prefix for commit signatures.
const COMMIT_SIGNATURE_LABEL: &[u8] = b"davey10 commit";

/// Sealed box info string for path entry secrets.
const PATH_SECRET_INFO: &[u8] = b"davey10 path secret";

/// Sealed box info string for welcome joiner secrets.
const WELCOME_INFO: &[u8] = b"davey10 welcome";

/// Domain separation prefix for confirmed transcript hashes.
const CONFIRMED_HASH_LABEL: &[u8] = b"davey10 confirmed";

/// Domain separation prefix for interim transcript hashes.
const INTERIM_HASH_LABEL: &[u8] = b"davey10 interim";

/// Serialized messages produced by building a commit.
#[derive(Debug, Clone)]
pub struct CommitMessages {
    /// Commit for every current member.
    pub commit: Vec<u8>,
    /// Welcome for added members, when the commit adds any.
    pub welcome: Option<Vec<u8>>,
}

/// What applying a commit did to the local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEffect {
    /// A remote commit advanced the group.
    Applied {
        /// Epoch the group is now in.
        new_epoch: u64,
    },
    /// Our own pending commit was confirmed and merged.
    OwnCommitMerged {
        /// Epoch the group is now in.
        new_epoch: u64,
    },
    /// The commit removed the local member. The caller must tear the
    /// group down.
    RemovedSelf,
}

/// A staged commit of our own, waiting for transport confirmation.
struct PendingCommit {
    target_epoch: u64,
    staged_tree: RatchetTree,
    staged_confirmed: Vec<u8>,
    staged_interim: Vec<u8>,
    staged_secrets: EpochSecrets,
    new_encryption_secret: StaticSecret,
    proposals: Vec<Proposal>,
}

/// A fully validated remote commit, ready to adopt.
struct StagedRemote {
    target_epoch: u64,
    tree: RatchetTree,
    confirmed: Vec<u8>,
    interim: Vec<u8>,
    secrets: EpochSecrets,
    removes_us: bool,
}

/// Group session state for one channel.
pub struct Group {
    suite: Ciphersuite,
    protocol_version: u16,
    group_id: u64,
    #[allow(dead_code)]
    own_user_id: u64,
    own_leaf: u32,
    tree: RatchetTree,
    epoch: u64,
    confirmed_transcript_hash: Vec<u8>,
    interim_transcript_hash: Vec<u8>,
    history: EpochHistory,
    own_encryption_secret: StaticSecret,
    pending_proposals: Vec<Proposal>,
    pending_commit: Option<PendingCommit>,
    config: GroupConfig,
}

impl Group {
    /// Founds a new single-member group at epoch zero.
    ///
    /// The founding epoch's secrets are derived from a random init
    /// secret, so two groups founded for the same channel never share
    /// key material.
    pub fn new_founding<R: RngCore + CryptoRng>(
        suite: Ciphersuite,
        protocol_version: u16,
        group_id: u64,
        own_user_id: u64,
        signature_key: [u8; 32],
        config: GroupConfig,
        rng: &mut R,
    ) -> Self {
        let own_encryption_secret = StaticSecret::random_from_rng(&mut *rng);
        let encryption_key = *PublicKey::from(&own_encryption_secret).as_bytes();

        let max_members = config.max_members.max(1);
        let mut tree = RatchetTree::new(max_members);
        let Ok(own_leaf) = tree.add(LeafNode {
            user_id: own_user_id,
            encryption_key,
            signature_key,
        }) else {
            unreachable!("an empty tree accepts its first member")
        };

        let mut init_bytes = vec![0u8; 32];
        rng.fill_bytes(&mut init_bytes);
        let random_init = Secret::new(init_bytes);
        let commit_secret = Secret::zeroed(32);
        let joiner = joiner_secret(&random_init, &commit_secret);

        let context = context_bytes(&GroupContext {
            protocol_version,
            suite_id: suite.id(),
            group_id,
            epoch: 0,
            tree_hash: tree.tree_hash().to_vec().into(),
            confirmed_transcript_hash: Vec::new().into(),
        });
        let secrets = EpochSecrets::from_joiner(&joiner, &context, 0);
        let history = EpochHistory::new(secrets, config.retained_epochs);

        tracing::debug!(group_id, own_user_id, "founded group at epoch 0");

        Self {
            suite,
            protocol_version,
            group_id,
            own_user_id,
            own_leaf,
            tree,
            epoch: 0,
            confirmed_transcript_hash: Vec::new(),
            interim_transcript_hash: Vec::new(),
            history,
            own_encryption_secret,
            pending_proposals: Vec::new(),
            pending_commit: None,
            config,
        }
    }

    /// Joins an established group from a welcome message.
    ///
    /// The welcome does not carry the protocol version. It is folded
    /// into the group context instead, so a version mismatch between
    /// committer and joiner surfaces as a confirmation tag failure.
    ///
    /// # Errors
    ///
    /// - [`WelcomeError::MalformedWelcome`] if decoding fails or the
    ///   snapshot is internally inconsistent.
    /// - [`WelcomeError::UnsupportedSuite`] if the suite is unknown.
    /// - [`WelcomeError::NotAddressedToUs`] if no sealed secret matches
    ///   our key package.
    /// - [`WelcomeError::AuthenticationFailure`] if the joiner secret
    ///   cannot be opened or the confirmation tag does not verify.
    pub fn from_welcome(
        welcome_bytes: &[u8],
        bundle: &KeyPackageBundle,
        protocol_version: u16,
        own_user_id: u64,
        config: GroupConfig,
    ) -> Result<Self, WelcomeError> {
        let welcome = Welcome::tls_deserialize_exact(welcome_bytes).map_err(|e| {
            WelcomeError::MalformedWelcome {
                reason: e.to_string(),
            }
        })?;

        let suite = Ciphersuite::resolve(welcome.suite_id).map_err(|_| {
            WelcomeError::UnsupportedSuite {
                suite_id: welcome.suite_id,
            }
        })?;
        if welcome.suite_id != bundle.key_package().suite_id() {
            return Err(WelcomeError::MalformedWelcome {
                reason: "welcome suite does not match our key package".to_string(),
            });
        }

        let our_ref = bundle.key_package().hash_ref()?;
        let entry = welcome
            .secrets
            .iter()
            .find(|s| s.key_package_ref.as_slice() == our_ref.as_slice())
            .ok_or(WelcomeError::NotAddressedToUs)?;

        let sealed = SealedBox::from_bytes(entry.sealed.as_slice())?;
        let aad = welcome_aad(welcome.group_id, welcome.epoch, entry.new_leaf);
        let mut secrets_bytes = sealed_box::open(
            suite,
            bundle.init_secret(),
            WELCOME_INFO,
            &aad,
            &sealed,
        )
        .map_err(|e| match e {
            CryptoError::AuthenticationFailed => WelcomeError::AuthenticationFailure {
                reason: "joiner secret decryption",
            },
            other => WelcomeError::Crypto(other),
        })?;
        let decoded = GroupSecrets::tls_deserialize_exact(&secrets_bytes);
        secrets_bytes.zeroize();
        let group_secrets = decoded.map_err(|e| WelcomeError::MalformedWelcome {
            reason: e.to_string(),
        })?;
        let joiner = Secret::from_slice(group_secrets.joiner_secret.as_slice());
        if joiner.len() != 32 {
            return Err(WelcomeError::MalformedWelcome {
                reason: "joiner secret has the wrong length".to_string(),
            });
        }

        let tree = rebuild_tree(&welcome, config.max_members.max(1))?;
        let own_leaf = entry.new_leaf;
        let Some(own) = tree.leaf(own_leaf) else {
            return Err(WelcomeError::MalformedWelcome {
                reason: "our leaf is vacant in the welcome tree".to_string(),
            });
        };
        let expected_encryption_key = *PublicKey::from(bundle.init_secret()).as_bytes();
        if own.user_id != own_user_id
            || own.encryption_key != expected_encryption_key
            || own.signature_key[..] != *bundle.key_package().signature_key()
        {
            return Err(WelcomeError::MalformedWelcome {
                reason: "our leaf does not match our key package".to_string(),
            });
        }

        let context = context_bytes(&GroupContext {
            protocol_version,
            suite_id: suite.id(),
            group_id: welcome.group_id,
            epoch: welcome.epoch,
            tree_hash: tree.tree_hash().to_vec().into(),
            confirmed_transcript_hash: welcome.confirmed_transcript_hash.clone(),
        });
        let secrets = EpochSecrets::from_joiner(&joiner, &context, welcome.epoch);
        if !verify_confirmation_tag(
            &secrets.confirmation_key,
            welcome.confirmed_transcript_hash.as_slice(),
            welcome.confirmation_tag.as_slice(),
        ) {
            return Err(WelcomeError::AuthenticationFailure {
                reason: "confirmation tag",
            });
        }

        tracing::debug!(
            group_id = welcome.group_id,
            epoch = welcome.epoch,
            own_leaf,
            "joined group from welcome"
        );

        Ok(Self {
            suite,
            protocol_version,
            group_id: welcome.group_id,
            own_user_id,
            own_leaf,
            tree,
            epoch: welcome.epoch,
            confirmed_transcript_hash: welcome.confirmed_transcript_hash.as_slice().to_vec(),
            interim_transcript_hash: welcome.interim_transcript_hash.as_slice().to_vec(),
            history: EpochHistory::new(secrets, config.retained_epochs),
            own_encryption_secret: bundle.init_secret().clone(),
            pending_proposals: Vec::new(),
            pending_commit: None,
            config,
        })
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Group identifier.
    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    /// Ciphersuite the group runs.
    pub fn suite(&self) -> Ciphersuite {
        self.suite
    }

    /// Our leaf index.
    pub fn own_leaf_index(&self) -> u32 {
        self.own_leaf
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.tree.member_count()
    }

    /// User ids of all members in leaf order.
    pub fn user_ids(&self) -> Vec<u64> {
        self.tree.user_ids()
    }

    /// Leaf index of the member with `user_id`.
    pub fn leaf_of_user(&self, user_id: u64) -> Option<u32> {
        self.tree.leaf_of_user(user_id)
    }

    /// Signature key of the member with `user_id`.
    pub fn signature_key_of_user(&self, user_id: u64) -> Option<[u8; 32]> {
        let leaf_index = self.tree.leaf_of_user(user_id)?;
        self.tree.leaf(leaf_index).map(|l| l.signature_key)
    }

    /// Leaf index of a frame sender, if the user is a current member.
    pub fn sender_leaf(&self, user_id: u64) -> Option<u32> {
        self.tree.leaf_of_user(user_id)
    }

    /// Authenticator of the current epoch.
    pub fn epoch_authenticator(&self) -> &Secret {
        &self.history.current().authenticator
    }

    /// Secrets for `epoch`, if still retained.
    pub fn secrets_for_epoch(&self, epoch: u64) -> Option<&EpochSecrets> {
        self.history.get(epoch)
    }

    /// Retained epoch secret history, current epoch last.
    pub fn epoch_history(&self) -> &EpochHistory {
        &self.history
    }

    /// Whether a commit of our own is staged and unconfirmed.
    pub fn has_pending_commit(&self) -> bool {
        self.pending_commit.is_some()
    }

    /// Number of queued proposals awaiting a commit.
    pub fn pending_proposal_count(&self) -> usize {
        self.pending_proposals.len()
    }

    /// Configuration the group was built with.
    pub(crate) fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Queues an addition after fully validating the key package.
    ///
    /// # Errors
    ///
    /// - [`ProposalError::KeyPackage`] if the package fails validation
    ///   or targets a different suite or version.
    /// - [`ProposalError::Tree`] if the user is already a member, is
    ///   already queued, or the group is full.
    pub fn queue_add(&mut self, key_package: KeyPackage) -> Result<(), ProposalError> {
        key_package.verify().map_err(ProposalError::KeyPackage)?;
        if key_package.suite_id() != self.suite.id() {
            return Err(ProposalError::KeyPackage(
                crate::errors::KeyPackageError::UnsupportedSuite {
                    suite_id: key_package.suite_id(),
                },
            ));
        }
        if key_package.protocol_version() != self.protocol_version {
            return Err(ProposalError::KeyPackage(
                crate::errors::KeyPackageError::UnsupportedVersion {
                    version: key_package.protocol_version(),
                },
            ));
        }
        let user_id = key_package.user_id();
        if self.tree.leaf_of_user(user_id).is_some() || self.queued_add_for(user_id) {
            return Err(ProposalError::Tree(TreeError::DuplicateMember { user_id }));
        }
        let queued_adds = self.queued_add_count();
        let queued_removes = self.queued_remove_count();
        let projected = self.tree.member_count() + queued_adds + 1 - queued_removes;
        if projected > self.config.max_members.max(1) {
            return Err(ProposalError::Tree(TreeError::CapacityExceeded {
                capacity: self.config.max_members.max(1),
            }));
        }
        self.pending_proposals
            .push(Proposal::Add(wire::AddProposal { key_package }));
        Ok(())
    }

    /// Queues a removal of the member with `user_id`.
    ///
    /// Queueing the same removal twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ProposalError::UnknownUser`] if no member has this id.
    /// - [`ProposalError::SelfRemoval`] when targeting the local member.
    pub fn queue_remove(&mut self, user_id: u64) -> Result<u32, ProposalError> {
        let leaf_index = self
            .tree
            .leaf_of_user(user_id)
            .ok_or(ProposalError::UnknownUser { user_id })?;
        if leaf_index == self.own_leaf {
            return Err(ProposalError::SelfRemoval);
        }
        let already_queued = self.pending_proposals.iter().any(|p| {
            matches!(p, Proposal::Remove(r) if r.leaf_index == leaf_index)
        });
        if !already_queued {
            self.pending_proposals
                .push(Proposal::Remove(wire::RemoveProposal { leaf_index }));
        }
        Ok(leaf_index)
    }

    /// Queues a rotation of our own leaf keys.
    ///
    /// Queueing a rotation twice is a no-op.
    pub fn queue_update(&mut self) {
        let already_queued = self
            .pending_proposals
            .iter()
            .any(|p| matches!(p, Proposal::Update(_)));
        if !already_queued {
            self.pending_proposals.push(Proposal::Update(wire::UpdateProposal {
                leaf_index: self.own_leaf,
            }));
        }
    }

    /// Builds a commit over all queued proposals and stages the next
    /// epoch locally.
    ///
    /// Nothing is applied yet: the caller sends the returned messages to
    /// the transport, then merges on confirmation or discards on
    /// rejection. If the build fails the queue is left untouched.
    ///
    /// # Errors
    ///
    /// - [`CommitError::CommitPending`] if a staged commit exists.
    /// - [`CommitError::NothingToCommit`] if the queue is empty.
    /// - [`CommitError::AuthenticationFailure`] if a queued key package
    ///   no longer verifies.
    /// - [`CommitError::Tree`] if the queue conflicts with the tree.
    pub fn build_commit<R: RngCore + CryptoRng>(
        &mut self,
        signer: &davey_crypto::SigningKeyPair,
        rng: &mut R,
    ) -> Result<CommitMessages, CommitError> {
        if self.pending_commit.is_some() {
            return Err(CommitError::CommitPending);
        }
        if self.pending_proposals.is_empty() {
            return Err(CommitError::NothingToCommit);
        }

        validate_proposals(&self.tree, &self.pending_proposals, self.config.max_members)?;

        let new_encryption_secret = StaticSecret::random_from_rng(&mut *rng);
        let new_encryption_key = *PublicKey::from(&new_encryption_secret).as_bytes();
        let (mut staged_tree, added) = apply_commit_changes(
            &self.tree,
            self.own_leaf,
            new_encryption_key,
            &self.pending_proposals,
        )?;

        let mut entry_bytes = vec![0u8; 32];
        rng.fill_bytes(&mut entry_bytes);
        let entry = Secret::new(entry_bytes);
        let commit_secret = staged_tree
            .derive_commit_secret(self.own_leaf, &entry)
            .map_err(CommitError::Tree)?;

        let target_epoch = self.epoch + 1;
        let mut entries = Vec::new();
        for (leaf_index, leaf) in staged_tree.occupied_leaves() {
            if leaf_index == self.own_leaf {
                continue;
            }
            let continuing = self
                .tree
                .leaf(leaf_index)
                .is_some_and(|old| old.user_id == leaf.user_id);
            if !continuing {
                continue;
            }
            let aad = path_aad(self.group_id, target_epoch, self.own_leaf, leaf_index);
            let sealed = sealed_box::seal(
                self.suite,
                &leaf.encryption_key,
                PATH_SECRET_INFO,
                &aad,
                entry.as_slice(),
                rng,
            )?;
            entries.push(PathSecretCiphertext {
                recipient_leaf: leaf_index,
                sealed: sealed.to_bytes().into(),
            });
        }

        let content = CommitContent {
            group_id: self.group_id,
            epoch: self.epoch,
            committer_leaf: self.own_leaf,
            proposals: self.pending_proposals.clone(),
            path: UpdatePath {
                leaf_encryption_key: new_encryption_key.to_vec().into(),
                entries,
            },
        };
        let content_bytes =
            content
                .tls_serialize_detached()
                .map_err(|e| CommitError::MalformedCommit {
                    reason: e.to_string(),
                })?;
        let signature = signer.sign(&signed_commit_message(&content_bytes));

        let confirmed = confirmed_hash(&self.interim_transcript_hash, &content_bytes, &signature);
        let context = context_bytes(&GroupContext {
            protocol_version: self.protocol_version,
            suite_id: self.suite.id(),
            group_id: self.group_id,
            epoch: target_epoch,
            tree_hash: staged_tree.tree_hash().to_vec().into(),
            confirmed_transcript_hash: confirmed.to_vec().into(),
        });
        let joiner = joiner_secret(&self.history.current().init_secret, &commit_secret);
        let secrets = EpochSecrets::from_joiner(&joiner, &context, target_epoch);
        let tag = confirmation_tag(&secrets.confirmation_key, &confirmed);
        let interim = interim_hash(&confirmed, &tag);

        let commit = Commit {
            content,
            signature: signature.to_vec().into(),
            confirmation_tag: tag.to_vec().into(),
        };
        let commit_bytes =
            commit
                .tls_serialize_detached()
                .map_err(|e| CommitError::MalformedCommit {
                    reason: e.to_string(),
                })?;

        let welcome = if added.is_empty() {
            None
        } else {
            Some(self.build_welcome(
                &staged_tree,
                target_epoch,
                &joiner,
                &confirmed,
                &interim,
                &tag,
                &added,
                rng,
            )?)
        };

        staged_tree.clear_parent_secrets();
        self.pending_commit = Some(PendingCommit {
            target_epoch,
            staged_tree,
            staged_confirmed: confirmed.to_vec(),
            staged_interim: interim.to_vec(),
            staged_secrets: secrets,
            new_encryption_secret,
            proposals: std::mem::take(&mut self.pending_proposals),
        });

        tracing::debug!(
            target_epoch,
            members_added = added.len(),
            "built commit, awaiting confirmation"
        );

        Ok(CommitMessages {
            commit: commit_bytes,
            welcome,
        })
    }

    /// Merges our staged commit after transport confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::NoPendingCommit`] if nothing is staged.
    pub fn merge_pending_commit(&mut self) -> Result<u64, CommitError> {
        let pending = self
            .pending_commit
            .take()
            .ok_or(CommitError::NoPendingCommit)?;

        let old_epoch = self.epoch;
        self.tree = pending.staged_tree;
        self.confirmed_transcript_hash = pending.staged_confirmed;
        self.interim_transcript_hash = pending.staged_interim;
        self.epoch = pending.target_epoch;
        self.history.push(pending.staged_secrets);
        self.own_encryption_secret = pending.new_encryption_secret;

        debug_assert_eq!(
            self.epoch,
            old_epoch + 1,
            "invariant: merge advances exactly one epoch"
        );
        tracing::debug!(epoch = self.epoch, "merged pending commit");
        Ok(self.epoch)
    }

    /// Discards our staged commit and re-queues its proposals.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::NoPendingCommit`] if nothing is staged.
    pub fn discard_pending_commit(&mut self) -> Result<(), CommitError> {
        let pending = self
            .pending_commit
            .take()
            .ok_or(CommitError::NoPendingCommit)?;

        let mut restored = pending.proposals;
        restored.append(&mut self.pending_proposals);
        self.pending_proposals = restored;

        tracing::debug!(
            target_epoch = pending.target_epoch,
            "discarded pending commit"
        );
        Ok(())
    }

    /// Applies a remote commit, resolving races against our own pending
    /// commit by lowest committer leaf.
    ///
    /// # Errors
    ///
    /// - [`CommitError::StaleEpoch`] if the commit targets a past or
    ///   future epoch.
    /// - [`CommitError::TieBreakLost`] if our pending commit outranks
    ///   the incoming one.
    /// - [`CommitError::InvalidSignature`] if the committer's signature
    ///   does not verify.
    /// - [`CommitError::AuthenticationFailure`] if the path entry or
    ///   confirmation tag fails cryptographic checks.
    pub fn process_commit(&mut self, commit_bytes: &[u8]) -> Result<CommitEffect, CommitError> {
        let commit = Commit::tls_deserialize_exact(commit_bytes).map_err(|e| {
            CommitError::MalformedCommit {
                reason: e.to_string(),
            }
        })?;
        self.apply_commit(&commit)
    }

    /// Resolves a batch of commits delivered for the current epoch.
    ///
    /// The winner is the valid commit with the lowest committer leaf,
    /// with our own pending commit participating as a candidate. All
    /// other commits in the batch lose.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::MalformedCommit`] if the batch holds no
    /// commit for the current epoch, or any error the winning commit's
    /// application produces.
    pub fn process_commits(
        &mut self,
        commits: &[Vec<u8>],
    ) -> Result<CommitEffect, CommitError> {
        let mut candidates: Vec<Commit> = Vec::new();
        for bytes in commits {
            match Commit::tls_deserialize_exact(bytes) {
                Ok(commit) if commit.content.epoch == self.epoch => candidates.push(commit),
                Ok(commit) => {
                    tracing::debug!(
                        commit_epoch = commit.content.epoch,
                        current_epoch = self.epoch,
                        "ignoring commit for a different epoch"
                    );
                },
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring undecodable commit in batch");
                },
            }
        }

        let remote_winner = candidates
            .into_iter()
            .min_by_key(|c| c.content.committer_leaf);

        match (remote_winner, self.pending_commit.is_some()) {
            (Some(commit), true) if self.own_leaf < commit.content.committer_leaf => {
                // Our own commit outranks every remote candidate.
                self.merge_pending_commit()
                    .map(|new_epoch| CommitEffect::OwnCommitMerged { new_epoch })
            },
            (Some(commit), _) => self.apply_commit(&commit),
            (None, true) => self
                .merge_pending_commit()
                .map(|new_epoch| CommitEffect::OwnCommitMerged { new_epoch }),
            (None, false) => Err(CommitError::MalformedCommit {
                reason: "batch holds no commit for the current epoch".to_string(),
            }),
        }
    }

    /// Validates and applies one decoded commit.
    fn apply_commit(&mut self, commit: &Commit) -> Result<CommitEffect, CommitError> {
        let content = &commit.content;
        if content.group_id != self.group_id {
            return Err(CommitError::MalformedCommit {
                reason: "commit addresses a different group".to_string(),
            });
        }
        if content.epoch != self.epoch {
            return Err(CommitError::StaleEpoch {
                current_epoch: self.epoch,
                commit_epoch: content.epoch,
            });
        }

        let committer = content.committer_leaf;
        let committer_leaf = self
            .tree
            .require_leaf(committer)
            .map_err(CommitError::Tree)?;

        let content_bytes =
            content
                .tls_serialize_detached()
                .map_err(|e| CommitError::MalformedCommit {
                    reason: e.to_string(),
                })?;
        verify_signature(
            &committer_leaf.signature_key,
            &signed_commit_message(&content_bytes),
            commit.signature.as_slice(),
        )
        .map_err(|_| CommitError::InvalidSignature)?;

        if committer == self.own_leaf {
            // The transport echoed our own commit back: that is the
            // confirmation signal for the staged state.
            return match self.merge_pending_commit() {
                Ok(new_epoch) => Ok(CommitEffect::OwnCommitMerged { new_epoch }),
                Err(CommitError::NoPendingCommit) => Err(CommitError::MalformedCommit {
                    reason: "own commit echoed without pending state".to_string(),
                }),
                Err(e) => Err(e),
            };
        }

        if self.pending_commit.is_some() && self.own_leaf < committer {
            return Err(CommitError::TieBreakLost {
                winner_leaf: self.own_leaf,
                loser_leaf: committer,
            });
        }

        let staged = self.stage_remote_commit(commit, &content_bytes)?;

        // Every check has passed: from here the transition is committed.
        if self.pending_commit.is_some() {
            tracing::debug!(
                winner_leaf = committer,
                own_leaf = self.own_leaf,
                "pending commit lost the tie-break, discarding"
            );
            self.discard_pending_commit()?;
        }

        if staged.removes_us {
            tracing::debug!(epoch = self.epoch, "removed from group by commit");
            return Ok(CommitEffect::RemovedSelf);
        }

        let old_epoch = self.epoch;
        self.tree = staged.tree;
        self.confirmed_transcript_hash = staged.confirmed;
        self.interim_transcript_hash = staged.interim;
        self.epoch = staged.target_epoch;
        self.history.push(staged.secrets);
        self.retain_unsatisfied_proposals();

        debug_assert_eq!(
            self.epoch,
            old_epoch + 1,
            "invariant: a commit advances exactly one epoch"
        );
        tracing::debug!(
            epoch = self.epoch,
            committer_leaf = committer,
            "applied remote commit"
        );
        Ok(CommitEffect::Applied {
            new_epoch: self.epoch,
        })
    }

    /// Runs every validation and derivation for a remote commit without
    /// touching live state.
    fn stage_remote_commit(
        &self,
        commit: &Commit,
        content_bytes: &[u8],
    ) -> Result<StagedRemote, CommitError> {
        let content = &commit.content;
        let committer = content.committer_leaf;

        validate_proposals(&self.tree, &content.proposals, self.config.max_members)?;

        let leaf_key: [u8; X25519_KEY_LEN] = content
            .path
            .leaf_encryption_key
            .as_slice()
            .try_into()
            .map_err(|_| CommitError::MalformedCommit {
                reason: "leaf encryption key has the wrong length".to_string(),
            })?;
        let (mut staged_tree, _added) =
            apply_commit_changes(&self.tree, committer, leaf_key, &content.proposals)?;

        let removes_us = content.proposals.iter().any(|p| {
            matches!(p, Proposal::Remove(r) if r.leaf_index == self.own_leaf)
        });
        let target_epoch = content.epoch + 1;
        if removes_us {
            return Ok(StagedRemote {
                target_epoch,
                tree: staged_tree,
                confirmed: Vec::new(),
                interim: Vec::new(),
                secrets: self.history.current().clone(),
                removes_us: true,
            });
        }

        let entry_ct = content
            .path
            .entries
            .iter()
            .find(|e| e.recipient_leaf == self.own_leaf)
            .ok_or_else(|| CommitError::MalformedCommit {
                reason: "no path entry addressed to this leaf".to_string(),
            })?;
        let sealed = SealedBox::from_bytes(entry_ct.sealed.as_slice())?;
        let aad = path_aad(self.group_id, target_epoch, committer, self.own_leaf);
        let entry_bytes = sealed_box::open(
            self.suite,
            &self.own_encryption_secret,
            PATH_SECRET_INFO,
            &aad,
            &sealed,
        )
        .map_err(|e| match e {
            CryptoError::AuthenticationFailed => CommitError::AuthenticationFailure {
                reason: "path entry decryption",
            },
            other => CommitError::Crypto(other),
        })?;
        if entry_bytes.len() != 32 {
            return Err(CommitError::MalformedCommit {
                reason: "path entry secret has the wrong length".to_string(),
            });
        }
        let entry = Secret::new(entry_bytes);

        let commit_secret = staged_tree
            .derive_commit_secret(committer, &entry)
            .map_err(CommitError::Tree)?;

        let confirmed =
            confirmed_hash(&self.interim_transcript_hash, content_bytes, commit.signature.as_slice());
        let context = context_bytes(&GroupContext {
            protocol_version: self.protocol_version,
            suite_id: self.suite.id(),
            group_id: self.group_id,
            epoch: target_epoch,
            tree_hash: staged_tree.tree_hash().to_vec().into(),
            confirmed_transcript_hash: confirmed.to_vec().into(),
        });
        let joiner = joiner_secret(&self.history.current().init_secret, &commit_secret);
        let secrets = EpochSecrets::from_joiner(&joiner, &context, target_epoch);
        if !verify_confirmation_tag(
            &secrets.confirmation_key,
            &confirmed,
            commit.confirmation_tag.as_slice(),
        ) {
            return Err(CommitError::AuthenticationFailure {
                reason: "confirmation tag",
            });
        }
        let interim = interim_hash(&confirmed, commit.confirmation_tag.as_slice());

        staged_tree.clear_parent_secrets();
        Ok(StagedRemote {
            target_epoch,
            tree: staged_tree,
            confirmed: confirmed.to_vec(),
            interim: interim.to_vec(),
            secrets,
            removes_us: false,
        })
    }

    /// Drops queued proposals a just-applied commit already satisfied.
    fn retain_unsatisfied_proposals(&mut self) {
        let tree = &self.tree;
        self.pending_proposals.retain(|p| match p {
            Proposal::Add(add) => tree.leaf_of_user(add.key_package.user_id()).is_none(),
            Proposal::Remove(remove) => tree.leaf(remove.leaf_index).is_some(),
            Proposal::Update(_) => true,
        });
    }

    /// Seals the joiner secret to every added member and assembles the
    /// welcome.
    #[allow(clippy::too_many_arguments)]
    fn build_welcome<R: RngCore + CryptoRng>(
        &self,
        staged_tree: &RatchetTree,
        target_epoch: u64,
        joiner: &Secret,
        confirmed: &[u8],
        interim: &[u8],
        tag: &[u8],
        added: &[(u32, KeyPackage)],
        rng: &mut R,
    ) -> Result<Vec<u8>, CommitError> {
        let mut secrets = Vec::with_capacity(added.len());
        for (new_leaf, key_package) in added {
            let init_key: [u8; X25519_KEY_LEN] = key_package
                .init_key()
                .try_into()
                .map_err(|_| CommitError::MalformedCommit {
                    reason: "added key package has a malformed init key".to_string(),
                })?;
            let group_secrets = GroupSecrets {
                joiner_secret: joiner.as_slice().to_vec().into(),
            };
            let mut plaintext = group_secrets.tls_serialize_detached().map_err(|e| {
                CommitError::MalformedCommit {
                    reason: e.to_string(),
                }
            })?;
            let aad = welcome_aad(self.group_id, target_epoch, *new_leaf);
            let sealed = sealed_box::seal(
                self.suite,
                &init_key,
                WELCOME_INFO,
                &aad,
                &plaintext,
                rng,
            )?;
            plaintext.zeroize();
            let key_package_ref = key_package.hash_ref().map_err(CommitError::KeyPackage)?;
            secrets.push(EncryptedGroupSecrets {
                new_leaf: *new_leaf,
                key_package_ref: key_package_ref.into(),
                sealed: sealed.to_bytes().into(),
            });
        }

        let tree: Vec<WelcomeLeaf> = staged_tree
            .occupied_leaves()
            .map(|(leaf_index, leaf)| WelcomeLeaf {
                leaf_index,
                user_id: leaf.user_id,
                encryption_key: leaf.encryption_key.to_vec().into(),
                signature_key: leaf.signature_key.to_vec().into(),
            })
            .collect();

        let welcome = Welcome {
            suite_id: self.suite.id(),
            group_id: self.group_id,
            epoch: target_epoch,
            slot_count: staged_tree.slots().len() as u32,
            tree,
            confirmed_transcript_hash: confirmed.to_vec().into(),
            interim_transcript_hash: interim.to_vec().into(),
            secrets,
            confirmation_tag: tag.to_vec().into(),
        };
        welcome
            .tls_serialize_detached()
            .map_err(|e| CommitError::MalformedCommit {
                reason: e.to_string(),
            })
    }

    /// Number of queued add proposals.
    fn queued_add_count(&self) -> usize {
        self.pending_proposals
            .iter()
            .filter(|p| matches!(p, Proposal::Add(_)))
            .count()
    }

    /// Number of queued remove proposals.
    fn queued_remove_count(&self) -> usize {
        self.pending_proposals
            .iter()
            .filter(|p| matches!(p, Proposal::Remove(_)))
            .count()
    }

    /// Whether an add for `user_id` is already queued.
    fn queued_add_for(&self, user_id: u64) -> bool {
        self.pending_proposals.iter().any(|p| {
            matches!(p, Proposal::Add(a) if a.key_package.user_id() == user_id)
        })
    }

    /// Captures the committed state for [`crate::snapshot`].
    ///
    /// Queued proposals and a staged commit of our own are not part of
    /// the snapshot; they refer to messages in flight and cannot be
    /// safely replayed after a restart.
    pub(crate) fn to_snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            suite_id: self.suite.id(),
            group_id: self.group_id,
            epoch: self.epoch,
            own_leaf: self.own_leaf,
            slot_count: self.tree.slots().len() as u32,
            leaves: self
                .tree
                .occupied_leaves()
                .map(|(leaf_index, leaf)| LeafSnapshot {
                    leaf_index,
                    user_id: leaf.user_id,
                    encryption_key: leaf.encryption_key,
                    signature_key: leaf.signature_key,
                })
                .collect(),
            confirmed_transcript_hash: self.confirmed_transcript_hash.clone(),
            interim_transcript_hash: self.interim_transcript_hash.clone(),
            own_encryption_secret: self.own_encryption_secret.to_bytes(),
            epochs: self
                .history
                .entries()
                .map(|secrets| EpochSnapshot {
                    epoch: secrets.epoch,
                    authenticator: secrets.authenticator.as_slice().to_vec(),
                    encryption_secret: secrets.encryption_secret.as_slice().to_vec(),
                    confirmation_key: secrets.confirmation_key.as_slice().to_vec(),
                    init_secret: secrets.init_secret.as_slice().to_vec(),
                })
                .collect(),
            max_members: self.config.max_members,
            retained_epochs: self.config.retained_epochs,
            passthrough_transition_ms: self.config.passthrough_transition.as_millis() as u64,
        }
    }

    /// Rebuilds a group from a snapshot.
    ///
    /// `signature_key` is the public half of the signing key the session
    /// resumes with; it must match what the snapshot's own leaf carries.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Decode`] if the snapshot is internally
    /// inconsistent or does not belong to this identity.
    pub(crate) fn from_snapshot(
        snapshot: GroupSnapshot,
        protocol_version: u16,
        own_user_id: u64,
        signature_key: [u8; 32],
    ) -> Result<Self, SnapshotError> {
        let suite = Ciphersuite::resolve(snapshot.suite_id).map_err(|_| SnapshotError::Decode {
            reason: format!("unsupported ciphersuite {:#06x}", snapshot.suite_id),
        })?;
        let config = GroupConfig {
            max_members: snapshot.max_members,
            retained_epochs: snapshot.retained_epochs,
            passthrough_transition: std::time::Duration::from_millis(
                snapshot.passthrough_transition_ms,
            ),
        };

        let slot_count = snapshot.slot_count as usize;
        if slot_count > config.max_members {
            return Err(SnapshotError::Decode {
                reason: "slot count exceeds the configured capacity".into(),
            });
        }
        let mut slots: Vec<Option<LeafNode>> = vec![None; slot_count];
        for leaf in &snapshot.leaves {
            let slot =
                slots
                    .get_mut(leaf.leaf_index as usize)
                    .ok_or_else(|| SnapshotError::Decode {
                        reason: "leaf index out of range".into(),
                    })?;
            if slot.is_some() {
                return Err(SnapshotError::Decode {
                    reason: "duplicate leaf index".into(),
                });
            }
            *slot = Some(LeafNode {
                user_id: leaf.user_id,
                encryption_key: leaf.encryption_key,
                signature_key: leaf.signature_key,
            });
        }
        let tree = RatchetTree::from_slots(slots, config.max_members).map_err(|e| {
            SnapshotError::Decode {
                reason: e.to_string(),
            }
        })?;

        let own = tree
            .leaf(snapshot.own_leaf)
            .ok_or_else(|| SnapshotError::Decode {
                reason: "own leaf is vacant".into(),
            })?;
        if own.user_id != own_user_id {
            return Err(SnapshotError::Decode {
                reason: "own leaf belongs to a different user".into(),
            });
        }
        if own.signature_key != signature_key {
            return Err(SnapshotError::Decode {
                reason: "signing key does not match the resumed leaf".into(),
            });
        }
        let own_encryption_secret = StaticSecret::from(snapshot.own_encryption_secret);
        if own.encryption_key != PublicKey::from(&own_encryption_secret).to_bytes() {
            return Err(SnapshotError::Decode {
                reason: "encryption key does not match the resumed leaf".into(),
            });
        }

        // Both transcript hashes are empty until the first commit, so a
        // founding-epoch snapshot legitimately carries none.
        let hashes_ok = if snapshot.epoch == 0 {
            snapshot.confirmed_transcript_hash.is_empty()
                && snapshot.interim_transcript_hash.is_empty()
        } else {
            snapshot.confirmed_transcript_hash.len() == 32
                && snapshot.interim_transcript_hash.len() == 32
        };
        if !hashes_ok {
            return Err(SnapshotError::Decode {
                reason: "transcript hash length".into(),
            });
        }

        let mut history: Option<EpochHistory> = None;
        let mut previous_epoch = None;
        for entry in &snapshot.epochs {
            if previous_epoch.is_some_and(|prev| entry.epoch <= prev) {
                return Err(SnapshotError::Decode {
                    reason: "epoch history is not strictly ascending".into(),
                });
            }
            previous_epoch = Some(entry.epoch);
            if entry.authenticator.len() != 32
                || entry.encryption_secret.len() != 32
                || entry.confirmation_key.len() != 32
                || entry.init_secret.len() != 32
            {
                return Err(SnapshotError::Decode {
                    reason: "epoch secret length".into(),
                });
            }
            let secrets = EpochSecrets {
                epoch: entry.epoch,
                authenticator: Secret::from_slice(&entry.authenticator),
                encryption_secret: Secret::from_slice(&entry.encryption_secret),
                confirmation_key: Secret::from_slice(&entry.confirmation_key),
                init_secret: Secret::from_slice(&entry.init_secret),
            };
            match history.as_mut() {
                Some(history) => history.push(secrets),
                None => history = Some(EpochHistory::new(secrets, config.retained_epochs)),
            }
        }
        let Some(history) = history else {
            return Err(SnapshotError::Decode {
                reason: "epoch history is empty".into(),
            });
        };
        if history.current().epoch != snapshot.epoch {
            return Err(SnapshotError::Decode {
                reason: "epoch history does not end at the current epoch".into(),
            });
        }

        Ok(Self {
            suite,
            protocol_version,
            group_id: snapshot.group_id,
            own_user_id,
            own_leaf: snapshot.own_leaf,
            tree,
            epoch: snapshot.epoch,
            confirmed_transcript_hash: snapshot.confirmed_transcript_hash,
            interim_transcript_hash: snapshot.interim_transcript_hash,
            history,
            own_encryption_secret,
            pending_proposals: Vec::new(),
            pending_commit: None,
            config,
        })
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("group_id", &self.group_id)
            .field("epoch", &self.epoch)
            .field("own_leaf", &self.own_leaf)
            .field("members", &self.tree.member_count())
            .field("pending_commit", &self.pending_commit.is_some())
            .finish_non_exhaustive()
    }
}

/// Serializes a group context.
fn context_bytes(context: &GroupContext) -> Vec<u8> {
    let Ok(bytes) = context.tls_serialize_detached() else {
        unreachable!("group context fields are within wire bounds")
    };
    bytes
}

/// Prefixes commit content with its signature domain label.
fn signed_commit_message(content_bytes: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(COMMIT_SIGNATURE_LABEL.len() + content_bytes.len());
    message.extend_from_slice(COMMIT_SIGNATURE_LABEL);
    message.extend_from_slice(content_bytes);
    message
}

/// New confirmed transcript hash after a commit.
fn confirmed_hash(interim: &[u8], content_bytes: &[u8], signature: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(CONFIRMED_HASH_LABEL);
    hasher.update(interim);
    hasher.update(content_bytes);
    hasher.update(signature);
    hasher.finalize().into()
}

/// New interim transcript hash after a commit's confirmation tag.
fn interim_hash(confirmed: &[u8], confirmation_tag: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(INTERIM_HASH_LABEL);
    hasher.update(confirmed);
    hasher.update(confirmation_tag);
    hasher.finalize().into()
}

/// Associated data binding a sealed path entry to its commit.
fn path_aad(group_id: u64, target_epoch: u64, committer_leaf: u32, recipient_leaf: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(24);
    aad.extend_from_slice(&group_id.to_be_bytes());
    aad.extend_from_slice(&target_epoch.to_be_bytes());
    aad.extend_from_slice(&committer_leaf.to_be_bytes());
    aad.extend_from_slice(&recipient_leaf.to_be_bytes());
    aad
}

/// Associated data binding a sealed joiner secret to its welcome.
fn welcome_aad(group_id: u64, epoch: u64, new_leaf: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(20);
    aad.extend_from_slice(&group_id.to_be_bytes());
    aad.extend_from_slice(&epoch.to_be_bytes());
    aad.extend_from_slice(&new_leaf.to_be_bytes());
    aad
}

/// Checks a proposal list against the current tree.
fn validate_proposals(
    tree: &RatchetTree,
    proposals: &[Proposal],
    max_members: usize,
) -> Result<(), CommitError> {
    let mut adds = 0usize;
    let mut removes = 0usize;
    for proposal in proposals {
        match proposal {
            Proposal::Add(add) => {
                add.key_package.verify().map_err(|e| match e {
                    crate::errors::KeyPackageError::InvalidSignature => {
                        CommitError::AuthenticationFailure {
                            reason: "key package verification",
                        }
                    },
                    other => CommitError::KeyPackage(other),
                })?;
                let user_id = add.key_package.user_id();
                if tree.leaf_of_user(user_id).is_some() {
                    return Err(CommitError::Tree(TreeError::DuplicateMember { user_id }));
                }
                adds += 1;
            },
            Proposal::Remove(remove) => {
                tree.require_leaf(remove.leaf_index).map_err(CommitError::Tree)?;
                removes += 1;
            },
            Proposal::Update(_) => {},
        }
    }
    let capacity = max_members.max(1);
    if tree.member_count() + adds > capacity + removes {
        return Err(CommitError::Tree(TreeError::CapacityExceeded { capacity }));
    }
    Ok(())
}

/// Applies a commit's changes to a copy of the tree.
///
/// Order is fixed: the committer's key rotation, then removes, then
/// adds. Returns the staged tree and the `(leaf, key package)` pairs of
/// added members.
fn apply_commit_changes(
    tree: &RatchetTree,
    committer_leaf: u32,
    new_leaf_key: [u8; 32],
    proposals: &[Proposal],
) -> Result<(RatchetTree, Vec<(u32, KeyPackage)>), CommitError> {
    let mut staged = tree.clone();
    staged
        .set_encryption_key(committer_leaf, new_leaf_key)
        .map_err(CommitError::Tree)?;

    for proposal in proposals {
        match proposal {
            Proposal::Remove(remove) => {
                if remove.leaf_index == committer_leaf {
                    return Err(CommitError::MalformedCommit {
                        reason: "commit removes its own committer".to_string(),
                    });
                }
                staged.remove(remove.leaf_index).map_err(CommitError::Tree)?;
            },
            Proposal::Update(update) => {
                if update.leaf_index != committer_leaf {
                    return Err(CommitError::MalformedCommit {
                        reason: "update proposal for a foreign leaf".to_string(),
                    });
                }
            },
            Proposal::Add(_) => {},
        }
    }

    let mut added = Vec::new();
    for proposal in proposals {
        if let Proposal::Add(add) = proposal {
            let encryption_key: [u8; 32] = add
                .key_package
                .init_key()
                .try_into()
                .map_err(|_| CommitError::MalformedCommit {
                    reason: "added key package has a malformed init key".to_string(),
                })?;
            let signature_key: [u8; 32] = add
                .key_package
                .signature_key()
                .try_into()
                .map_err(|_| CommitError::MalformedCommit {
                    reason: "added key package has a malformed signature key".to_string(),
                })?;
            let leaf_index = staged
                .add(LeafNode {
                    user_id: add.key_package.user_id(),
                    encryption_key,
                    signature_key,
                })
                .map_err(CommitError::Tree)?;
            added.push((leaf_index, add.key_package.clone()));
        }
    }

    Ok((staged, added))
}

/// Reconstructs the ratchet tree from a welcome's snapshot.
fn rebuild_tree(welcome: &Welcome, max_members: usize) -> Result<RatchetTree, WelcomeError> {
    let slot_count = welcome.slot_count as usize;
    let mut slots: Vec<Option<LeafNode>> = vec![None; slot_count];
    for leaf in &welcome.tree {
        let index = leaf.leaf_index as usize;
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| WelcomeError::MalformedWelcome {
                reason: "leaf index outside the advertised slot count".to_string(),
            })?;
        if slot.is_some() {
            return Err(WelcomeError::MalformedWelcome {
                reason: "duplicate leaf index in welcome tree".to_string(),
            });
        }
        let encryption_key: [u8; 32] = leaf.encryption_key.as_slice().try_into().map_err(|_| {
            WelcomeError::MalformedWelcome {
                reason: "leaf encryption key has the wrong length".to_string(),
            }
        })?;
        let signature_key: [u8; 32] = leaf.signature_key.as_slice().try_into().map_err(|_| {
            WelcomeError::MalformedWelcome {
                reason: "leaf signature key has the wrong length".to_string(),
            }
        })?;
        *slot = Some(LeafNode {
            user_id: leaf.user_id,
            encryption_key,
            signature_key,
        });
    }
    RatchetTree::from_slots(slots, max_members).map_err(|e| WelcomeError::MalformedWelcome {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use davey_crypto::SigningKeyPair;
    use rand::rngs::OsRng;

    use super::*;
    use crate::key_package::KeyPackageBundle;

    fn founder(user_id: u64) -> (Group, SigningKeyPair) {
        let signer = SigningKeyPair::generate(&mut OsRng);
        let group = Group::new_founding(
            Ciphersuite::default_suite(),
            1,
            42,
            user_id,
            signer.public_key(),
            GroupConfig::default(),
            &mut OsRng,
        );
        (group, signer)
    }

    fn joiner_bundle(user_id: u64) -> (KeyPackageBundle, SigningKeyPair) {
        let signer = SigningKeyPair::generate(&mut OsRng);
        let bundle = KeyPackageBundle::generate(
            1,
            Ciphersuite::default_suite(),
            user_id,
            &signer,
            &mut OsRng,
        )
        .unwrap();
        (bundle, signer)
    }

    #[test]
    fn founding_group_starts_alone_at_epoch_zero() {
        let (group, _) = founder(100);
        assert_eq!(group.epoch(), 0);
        assert_eq!(group.own_leaf_index(), 0);
        assert_eq!(group.member_count(), 1);
        assert_eq!(group.user_ids(), vec![100]);
        assert_eq!(group.epoch_authenticator().len(), 32);
        assert!(!group.has_pending_commit());
    }

    #[test]
    fn add_commit_welcome_converges_both_members() {
        let (mut alice, alice_signer) = founder(100);
        let (bob_bundle, _) = joiner_bundle(200);

        alice
            .queue_add(bob_bundle.key_package().clone())
            .unwrap();
        let messages = alice.build_commit(&alice_signer, &mut OsRng).unwrap();
        let welcome = messages.welcome.expect("adding a member produces a welcome");
        alice.merge_pending_commit().unwrap();

        let bob =
            Group::from_welcome(&welcome, &bob_bundle, 1, 200, GroupConfig::default()).unwrap();

        assert_eq!(alice.epoch(), 1);
        assert_eq!(bob.epoch(), 1);
        assert_eq!(alice.user_ids(), vec![100, 200]);
        assert_eq!(bob.user_ids(), vec![100, 200]);
        assert_eq!(
            alice.epoch_authenticator().as_slice(),
            bob.epoch_authenticator().as_slice()
        );
        assert_eq!(bob.own_leaf_index(), 1);
    }

    #[test]
    fn remote_member_processes_add_commit() {
        let (mut alice, alice_signer) = founder(100);
        let (bob_bundle, _) = joiner_bundle(200);
        let (carol_bundle, _) = joiner_bundle(300);

        alice.queue_add(bob_bundle.key_package().clone()).unwrap();
        let messages = alice.build_commit(&alice_signer, &mut OsRng).unwrap();
        alice.merge_pending_commit().unwrap();
        let mut bob = Group::from_welcome(
            &messages.welcome.unwrap(),
            &bob_bundle,
            1,
            200,
            GroupConfig::default(),
        )
        .unwrap();

        // Alice now adds Carol; Bob applies the commit.
        alice.queue_add(carol_bundle.key_package().clone()).unwrap();
        let messages = alice.build_commit(&alice_signer, &mut OsRng).unwrap();
        alice.merge_pending_commit().unwrap();
        let effect = bob.process_commit(&messages.commit).unwrap();

        assert_eq!(effect, CommitEffect::Applied { new_epoch: 2 });
        assert_eq!(bob.epoch(), 2);
        assert_eq!(bob.user_ids(), vec![100, 200, 300]);
        assert_eq!(
            alice.epoch_authenticator().as_slice(),
            bob.epoch_authenticator().as_slice()
        );
    }

    #[test]
    fn queue_add_rejects_duplicates_and_existing_members() {
        let (mut group, _) = founder(100);
        let (bundle, _) = joiner_bundle(200);
        group.queue_add(bundle.key_package().clone()).unwrap();
        assert_eq!(
            group.queue_add(bundle.key_package().clone()).unwrap_err(),
            ProposalError::Tree(TreeError::DuplicateMember { user_id: 200 })
        );
        let (own_bundle, _) = joiner_bundle(100);
        assert_eq!(
            group.queue_add(own_bundle.key_package().clone()).unwrap_err(),
            ProposalError::Tree(TreeError::DuplicateMember { user_id: 100 })
        );
    }

    #[test]
    fn queue_remove_validates_target() {
        let (mut group, _) = founder(100);
        assert_eq!(
            group.queue_remove(999).unwrap_err(),
            ProposalError::UnknownUser { user_id: 999 }
        );
        assert_eq!(group.queue_remove(100).unwrap_err(), ProposalError::SelfRemoval);
    }

    #[test]
    fn build_commit_requires_proposals_and_no_pending() {
        let (mut group, signer) = founder(100);
        assert_eq!(
            group.build_commit(&signer, &mut OsRng).unwrap_err(),
            CommitError::NothingToCommit
        );

        let (bundle, _) = joiner_bundle(200);
        group.queue_add(bundle.key_package().clone()).unwrap();
        group.build_commit(&signer, &mut OsRng).unwrap();
        group.queue_update();
        assert_eq!(
            group.build_commit(&signer, &mut OsRng).unwrap_err(),
            CommitError::CommitPending
        );
    }

    #[test]
    fn discard_restores_proposals() {
        let (mut group, signer) = founder(100);
        let (bundle, _) = joiner_bundle(200);
        group.queue_add(bundle.key_package().clone()).unwrap();
        group.build_commit(&signer, &mut OsRng).unwrap();
        assert_eq!(group.pending_proposal_count(), 0);

        group.discard_pending_commit().unwrap();
        assert!(!group.has_pending_commit());
        assert_eq!(group.pending_proposal_count(), 1);
        assert_eq!(group.epoch(), 0);

        // The restored queue can be committed again.
        group.build_commit(&signer, &mut OsRng).unwrap();
        group.merge_pending_commit().unwrap();
        assert_eq!(group.epoch(), 1);
        assert_eq!(group.user_ids(), vec![100, 200]);
    }

    #[test]
    fn merge_without_pending_fails() {
        let (mut group, _) = founder(100);
        assert_eq!(
            group.merge_pending_commit().unwrap_err(),
            CommitError::NoPendingCommit
        );
        assert_eq!(
            group.discard_pending_commit().unwrap_err(),
            CommitError::NoPendingCommit
        );
    }

    #[test]
    fn stale_commit_is_rejected() {
        let (mut alice, alice_signer) = founder(100);
        let (bob_bundle, _) = joiner_bundle(200);
        alice.queue_add(bob_bundle.key_package().clone()).unwrap();
        let messages = alice.build_commit(&alice_signer, &mut OsRng).unwrap();
        alice.merge_pending_commit().unwrap();
        let mut bob = Group::from_welcome(
            &messages.welcome.unwrap(),
            &bob_bundle,
            1,
            200,
            GroupConfig::default(),
        )
        .unwrap();

        // Replaying the already-applied commit targets epoch 0.
        let err = bob.process_commit(&messages.commit).unwrap_err();
        assert_eq!(
            err,
            CommitError::StaleEpoch {
                current_epoch: 1,
                commit_epoch: 0
            }
        );
        assert!(err.is_state_conflict());
    }

    #[test]
    fn tampered_commit_fails_signature_check() {
        let (mut alice, alice_signer) = founder(100);
        let (bob_bundle, _) = joiner_bundle(200);
        let (carol_bundle, _) = joiner_bundle(300);
        alice.queue_add(bob_bundle.key_package().clone()).unwrap();
        let messages = alice.build_commit(&alice_signer, &mut OsRng).unwrap();
        alice.merge_pending_commit().unwrap();
        let mut bob = Group::from_welcome(
            &messages.welcome.unwrap(),
            &bob_bundle,
            1,
            200,
            GroupConfig::default(),
        )
        .unwrap();

        alice.queue_add(carol_bundle.key_package().clone()).unwrap();
        let messages = alice.build_commit(&alice_signer, &mut OsRng).unwrap();
        let mut commit = Commit::tls_deserialize_exact(&messages.commit).unwrap();
        let mut forged = commit.signature.as_slice().to_vec();
        forged[0] ^= 0xFF;
        commit.signature = forged.into();
        let tampered = commit.tls_serialize_detached().unwrap();

        let err = bob.process_commit(&tampered).unwrap_err();
        assert_eq!(err, CommitError::InvalidSignature);
        assert!(err.is_authentication_failure());
        assert_eq!(bob.epoch(), 1, "failed commit must not change state");
    }

    #[test]
    fn welcome_for_someone_else_is_not_addressed_to_us() {
        let (mut alice, alice_signer) = founder(100);
        let (bob_bundle, _) = joiner_bundle(200);
        let (mallory_bundle, _) = joiner_bundle(300);
        alice.queue_add(bob_bundle.key_package().clone()).unwrap();
        let messages = alice.build_commit(&alice_signer, &mut OsRng).unwrap();

        let err = Group::from_welcome(
            &messages.welcome.unwrap(),
            &mallory_bundle,
            1,
            300,
            GroupConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, WelcomeError::NotAddressedToUs);
    }
}
