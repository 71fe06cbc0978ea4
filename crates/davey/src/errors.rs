//! Error types for session, group, and media operations.
//!
//! Each fallible operation family gets its own enum so callers can match
//! on exactly the failures that operation can produce. Cross-cutting
//! failures from the crypto layer arrive as wrapped [`CryptoError`]
//! values rather than being flattened into every enum.
//!
//! Two classification helpers matter for callers driving a transport:
//!
//! - [`CommitError::is_state_conflict`]: the commit referenced an epoch
//!   that is no longer current. Resync and retry against fresh state.
//! - [`CommitError::is_authentication_failure`]: cryptographic rejection.
//!   Retrying the same message will fail again.

pub use davey_crypto::CryptoError;
use thiserror::Error;

/// Errors from session lifecycle and membership operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The protocol version is outside the supported range.
    #[error("invalid protocol version {version}")]
    InvalidProtocolVersion {
        /// Version that was requested.
        version: u16,
    },

    /// The session has been closed and accepts no further operations.
    #[error("session is closed")]
    Closed,

    /// A group already exists for this session.
    #[error("group already established")]
    GroupExists,

    /// The operation needs an established group but none exists.
    #[error("no established group")]
    NoGroup,

    /// A key package operation failed.
    #[error(transparent)]
    KeyPackage(#[from] KeyPackageError),

    /// A proposal was rejected.
    #[error(transparent)]
    Proposal(#[from] ProposalError),

    /// A commit could not be built, merged, or applied.
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// A welcome could not be processed.
    #[error(transparent)]
    Welcome(#[from] WelcomeError),
}

impl SessionError {
    /// Returns `true` when the failure is a state conflict.
    ///
    /// See [`CommitError::is_state_conflict`].
    #[must_use]
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::Commit(e) if e.is_state_conflict())
    }

    /// Returns `true` when a message was rejected cryptographically.
    ///
    /// See [`CommitError::is_authentication_failure`].
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::Commit(e) => e.is_authentication_failure(),
            Self::Welcome(e) => matches!(
                e,
                WelcomeError::AuthenticationFailure { .. }
                    | WelcomeError::Crypto(CryptoError::AuthenticationFailed)
            ),
            _ => false,
        }
    }
}

/// Errors from creating or validating key packages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyPackageError {
    /// The package names a ciphersuite this build does not implement.
    #[error("unsupported ciphersuite {suite_id:#06x}")]
    UnsupportedSuite {
        /// Identifier found in the package.
        suite_id: u16,
    },

    /// The package was built for a protocol version we do not speak.
    #[error("unsupported protocol version {version}")]
    UnsupportedVersion {
        /// Version found in the package.
        version: u16,
    },

    /// The package could not be decoded or is internally inconsistent.
    #[error("malformed key package: {reason}")]
    MalformedPackage {
        /// What failed while decoding or validating.
        reason: String,
    },

    /// The package signature does not verify under its own signature key.
    #[error("key package signature verification failed")]
    InvalidSignature,

    /// A lower-level cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors from ratchet tree mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// The user already occupies a leaf in this tree.
    #[error("user {user_id} is already a member")]
    DuplicateMember {
        /// User that was added twice.
        user_id: u64,
    },

    /// The leaf index does not name an occupied leaf.
    #[error("no member at leaf {leaf_index}")]
    UnknownLeaf {
        /// Index that was referenced.
        leaf_index: u32,
    },

    /// Adding another member would exceed the configured group capacity.
    #[error("group is full ({capacity} members)")]
    CapacityExceeded {
        /// Configured maximum member count.
        capacity: usize,
    },
}

/// Errors from queueing proposals.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProposalError {
    /// No current member has this user id.
    #[error("user {user_id} is not a member")]
    UnknownUser {
        /// User that was referenced.
        user_id: u64,
    },

    /// Members leave by closing their session, not by removing themselves.
    #[error("cannot propose removing the local member")]
    SelfRemoval,

    /// The proposed key package was rejected.
    #[error(transparent)]
    KeyPackage(#[from] KeyPackageError),

    /// The proposal conflicts with the current tree.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Errors from building, applying, or merging commits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitError {
    /// There are no queued proposals to commit.
    #[error("no proposals pending")]
    NothingToCommit,

    /// A staged commit already exists. Merge or discard it first.
    #[error("a pending commit already exists")]
    CommitPending,

    /// There is no staged commit to merge or discard.
    #[error("no pending commit")]
    NoPendingCommit,

    /// The commit targets an epoch that is no longer current.
    #[error("stale commit: targets epoch {commit_epoch}, current epoch is {current_epoch}")]
    StaleEpoch {
        /// Epoch this group is currently in.
        current_epoch: u64,
        /// Epoch the commit tried to extend.
        commit_epoch: u64,
    },

    /// A concurrent commit from a lower leaf index took precedence.
    #[error("commit from leaf {loser_leaf} lost the tie-break to leaf {winner_leaf}")]
    TieBreakLost {
        /// Leaf whose commit was applied.
        winner_leaf: u32,
        /// Leaf whose commit was rejected.
        loser_leaf: u32,
    },

    /// The commit could not be decoded or is internally inconsistent.
    #[error("malformed commit: {reason}")]
    MalformedCommit {
        /// What failed while decoding or validating.
        reason: String,
    },

    /// The committer's signature over the commit content does not verify.
    #[error("commit signature verification failed")]
    InvalidSignature,

    /// A cryptographic check on the commit failed.
    #[error("commit authentication failed: {reason}")]
    AuthenticationFailure {
        /// Which check rejected the commit.
        reason: &'static str,
    },

    /// A referenced key package was rejected.
    #[error(transparent)]
    KeyPackage(#[from] KeyPackageError),

    /// The commit conflicts with the current tree.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A lower-level cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl CommitError {
    /// Returns `true` when the failure is a state conflict.
    ///
    /// State conflicts mean the group has moved on from the epoch the
    /// commit was built against. The message is permanently unusable but
    /// the operation can be retried against current state.
    #[must_use]
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            Self::StaleEpoch { .. } | Self::TieBreakLost { .. } | Self::CommitPending
        )
    }

    /// Returns `true` when the commit was rejected cryptographically.
    ///
    /// Signature failures, path secret decryption failures, and
    /// confirmation tag mismatches all indicate a forged, corrupted, or
    /// misdelivered message. Retrying cannot succeed.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature
                | Self::AuthenticationFailure { .. }
                | Self::Crypto(CryptoError::AuthenticationFailed)
        )
    }
}

/// Errors from processing a welcome message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WelcomeError {
    /// The welcome names a ciphersuite this build does not implement.
    #[error("unsupported ciphersuite {suite_id:#06x}")]
    UnsupportedSuite {
        /// Identifier found in the welcome.
        suite_id: u16,
    },

    /// No key package is pending, so this session cannot join.
    #[error("no key package pending for this session")]
    NoPendingJoin,

    /// The session already belongs to an established group.
    #[error("group already established")]
    GroupExists,

    /// None of the welcome's encrypted secrets match our key package.
    #[error("welcome does not address this session's key package")]
    NotAddressedToUs,

    /// The welcome could not be decoded or is internally inconsistent.
    #[error("malformed welcome: {reason}")]
    MalformedWelcome {
        /// What failed while decoding or validating.
        reason: String,
    },

    /// A cryptographic check on the welcome failed.
    #[error("welcome authentication failed: {reason}")]
    AuthenticationFailure {
        /// Which check rejected the welcome.
        reason: &'static str,
    },

    /// Our own key package could not be processed.
    #[error(transparent)]
    KeyPackage(#[from] KeyPackageError),

    /// A lower-level cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors from computing key fingerprints.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    /// Fingerprint format version zero is reserved.
    #[error("unsupported fingerprint format version {version}")]
    UnsupportedVersion {
        /// Version that was requested.
        version: u16,
    },

    /// The requested truncation length is outside the valid range.
    #[error("invalid fingerprint length {requested}, must be 1..={max}")]
    InvalidLength {
        /// Length that was requested.
        requested: usize,
        /// Largest supported length.
        max: usize,
    },

    /// Cannot fingerprint an empty key.
    #[error("cannot fingerprint an empty key")]
    EmptyKey,
}

/// Errors from formatting byte strings as displayable digit codes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    /// The input does not carry enough bytes for the requested digits.
    #[error("code input too short: {len} bytes, need {required}")]
    DataTooShort {
        /// Bytes available.
        len: usize,
        /// Bytes required for the requested code length.
        required: usize,
    },

    /// The requested length does not divide evenly into digit groups.
    #[error("code length {length} is not a multiple of group size {group_size}")]
    LengthNotMultiple {
        /// Requested total digit count.
        length: usize,
        /// Digits per group.
        group_size: usize,
    },

    /// The digit group size is outside the supported range.
    #[error("group size {group_size} is out of range, must be 1..=8")]
    GroupSizeOutOfRange {
        /// Group size that was requested.
        group_size: usize,
    },
}

/// Errors from session-level identity verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// The operation needs an established group but none exists.
    #[error("no established group")]
    NoEstablishedGroup,

    /// No current member has this user id.
    #[error("user {user_id} is not a member")]
    UnknownUser {
        /// User that was referenced.
        user_id: u64,
    },

    /// Computing a fingerprint failed.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// Formatting the displayable code failed.
    #[error(transparent)]
    Code(#[from] CodeError),
}

/// Errors from encrypting an outbound media frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptError {
    /// The session has no established epoch to encrypt under.
    #[error("session is not ready to encrypt")]
    NotReady,

    /// A lower-level cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors from decrypting an inbound media frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptError {
    /// The session has no established epoch to decrypt under.
    #[error("session is not ready to decrypt")]
    NotReady,

    /// The sender is not a known member of the group.
    #[error("unknown sender {user_id}")]
    UnknownSender {
        /// User the frame was attributed to.
        user_id: u64,
    },

    /// The frame's epoch is neither current nor retained.
    #[error("frame epoch {epoch} is not retained")]
    UnknownEpoch {
        /// Epoch found in the frame header.
        epoch: u64,
    },

    /// The frame header could not be parsed.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What failed while parsing.
        reason: &'static str,
    },

    /// The frame failed authenticated decryption.
    #[error("frame decryption failed")]
    DecryptionFailed,

    /// A lower-level cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors from exporting or resuming session snapshots.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// The session has no established group to snapshot.
    #[error("no established group")]
    NoEstablishedGroup,

    /// Encoding the snapshot failed.
    #[error("snapshot encode failed: {reason}")]
    Encode {
        /// Encoder failure description.
        reason: String,
    },

    /// Decoding the snapshot failed.
    #[error("snapshot decode failed: {reason}")]
    Decode {
        /// Decoder failure description.
        reason: String,
    },

    /// The snapshot was produced by an incompatible format version.
    #[error("snapshot format version {found} is not supported (expected {expected})")]
    VersionMismatch {
        /// Format version this build writes.
        expected: u16,
        /// Format version found in the snapshot.
        found: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_error_display_includes_epochs() {
        let err = CommitError::StaleEpoch {
            current_epoch: 7,
            commit_epoch: 3,
        };
        assert_eq!(
            err.to_string(),
            "stale commit: targets epoch 3, current epoch is 7"
        );
    }

    #[test]
    fn state_conflicts_are_classified() {
        assert!(
            CommitError::StaleEpoch {
                current_epoch: 2,
                commit_epoch: 1
            }
            .is_state_conflict()
        );
        assert!(
            CommitError::TieBreakLost {
                winner_leaf: 0,
                loser_leaf: 3
            }
            .is_state_conflict()
        );
        assert!(!CommitError::NothingToCommit.is_state_conflict());
        assert!(!CommitError::InvalidSignature.is_state_conflict());
    }

    #[test]
    fn authentication_failures_are_classified() {
        assert!(CommitError::InvalidSignature.is_authentication_failure());
        assert!(
            CommitError::AuthenticationFailure {
                reason: "confirmation tag mismatch"
            }
            .is_authentication_failure()
        );
        assert!(
            CommitError::Crypto(CryptoError::AuthenticationFailed).is_authentication_failure()
        );
        assert!(
            !CommitError::StaleEpoch {
                current_epoch: 1,
                commit_epoch: 0
            }
            .is_authentication_failure()
        );
    }

    #[test]
    fn key_package_error_display_formats_suite_as_hex() {
        let err = KeyPackageError::UnsupportedSuite { suite_id: 0x0042 };
        assert_eq!(err.to_string(), "unsupported ciphersuite 0x0042");
    }

    #[test]
    fn crypto_errors_convert_into_commit_errors() {
        let err: CommitError = CryptoError::AuthenticationFailed.into();
        assert!(matches!(err, CommitError::Crypto(_)));
    }

    #[test]
    fn code_error_display_names_the_constraint() {
        let err = CodeError::LengthNotMultiple {
            length: 44,
            group_size: 5,
        };
        assert_eq!(
            err.to_string(),
            "code length 44 is not a multiple of group size 5"
        );
    }
}
