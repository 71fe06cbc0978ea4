//! Wire formats for group messages.
//!
//! Commits and welcomes travel through an untrusted transport, so every
//! structure here has a canonical TLS-style encoding. Decoding is exact:
//! trailing bytes are an error.
//!
//! Proposals inside a commit apply in a fixed order: removes first, then
//! adds, with vacant slots assigned lowest-first. Committer and
//! receivers run the same procedure, so leaf assignment never diverges.

use tls_codec::{TlsDeserialize, TlsSerialize, TlsSize, VLBytes};

use crate::key_package::KeyPackage;

/// Context every member must agree on within an epoch.
///
/// Its serialized form feeds the key schedule, binding the derived
/// secrets to the group's full public state.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct GroupContext {
    /// Protocol version of the session.
    pub protocol_version: u16,
    /// Ciphersuite identifier.
    pub suite_id: u16,
    /// Group identifier, stable across epochs.
    pub group_id: u64,
    /// Epoch this context describes.
    pub epoch: u64,
    /// Hash of the public ratchet tree.
    pub tree_hash: VLBytes,
    /// Confirmed transcript hash up to and including this epoch's commit.
    pub confirmed_transcript_hash: VLBytes,
}

/// Adds the holder of a key package to the group.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct AddProposal {
    /// The joiner's signed key package.
    pub key_package: KeyPackage,
}

/// Removes the member at a leaf from the group.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct RemoveProposal {
    /// Leaf to vacate.
    pub leaf_index: u32,
}

/// Rotates the committer's leaf keys without a membership change.
///
/// The new encryption key travels in the commit's update path, so the
/// proposal itself only names the leaf being rotated.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct UpdateProposal {
    /// Leaf being rotated. Must match the committer's leaf.
    pub leaf_index: u32,
}

/// A single proposed group change.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
#[repr(u16)]
pub enum Proposal {
    /// Add a new member.
    #[tls_codec(discriminant = 1)]
    Add(AddProposal),
    /// Remove an existing member.
    #[tls_codec(discriminant = 2)]
    Remove(RemoveProposal),
    /// Rotate the committer's own leaf keys.
    #[tls_codec(discriminant = 3)]
    Update(UpdateProposal),
}

/// Path entry secret sealed to one continuing member.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct PathSecretCiphertext {
    /// Leaf of the member this entry is sealed to.
    pub recipient_leaf: u32,
    /// Sealed box over the path entry secret.
    pub sealed: VLBytes,
}

/// The committer's key rotation and the sealed path entries.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct UpdatePath {
    /// Committer's fresh leaf encryption key.
    pub leaf_encryption_key: VLBytes,
    /// One sealed entry per continuing member other than the committer.
    pub entries: Vec<PathSecretCiphertext>,
}

/// The signed portion of a commit.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct CommitContent {
    /// Group the commit belongs to.
    pub group_id: u64,
    /// Epoch the commit extends. The new epoch is one higher.
    pub epoch: u64,
    /// Leaf of the member who built the commit.
    pub committer_leaf: u32,
    /// Changes this commit applies.
    pub proposals: Vec<Proposal>,
    /// Key rotation and sealed path entries.
    pub path: UpdatePath,
}

/// A full commit message.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Commit {
    /// Signed content.
    pub content: CommitContent,
    /// Committer's signature over the content.
    pub signature: VLBytes,
    /// MAC over the new confirmed transcript hash under the new epoch's
    /// confirmation key.
    pub confirmation_tag: VLBytes,
}

/// One occupied leaf in a welcome's tree snapshot.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct WelcomeLeaf {
    /// Slot this member occupies.
    pub leaf_index: u32,
    /// Member identity.
    pub user_id: u64,
    /// Member leaf encryption key.
    pub encryption_key: VLBytes,
    /// Member signature key.
    pub signature_key: VLBytes,
}

/// Joining secret sealed to one added member's key package.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct EncryptedGroupSecrets {
    /// Leaf the joiner will occupy.
    pub new_leaf: u32,
    /// Hash reference of the key package this entry addresses.
    pub key_package_ref: VLBytes,
    /// Sealed box over the serialized [`GroupSecrets`].
    pub sealed: VLBytes,
}

/// Plaintext carried inside [`EncryptedGroupSecrets`].
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct GroupSecrets {
    /// Joiner secret for the welcome's epoch.
    pub joiner_secret: VLBytes,
}

/// Message that brings added members into an established epoch.
#[derive(Debug, Clone, PartialEq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Welcome {
    /// Ciphersuite of the group.
    pub suite_id: u16,
    /// Group the joiner is entering.
    pub group_id: u64,
    /// Epoch the joiner lands in.
    pub epoch: u64,
    /// Total number of leaf slots, including vacancies.
    pub slot_count: u32,
    /// Occupied leaves of the post-commit tree.
    pub tree: Vec<WelcomeLeaf>,
    /// Confirmed transcript hash of the welcome's epoch.
    pub confirmed_transcript_hash: VLBytes,
    /// Interim transcript hash the joiner resumes from.
    pub interim_transcript_hash: VLBytes,
    /// One sealed joining secret per added member.
    pub secrets: Vec<EncryptedGroupSecrets>,
    /// MAC over the confirmed transcript hash under the epoch's
    /// confirmation key.
    pub confirmation_tag: VLBytes,
}

#[cfg(test)]
mod tests {
    use tls_codec::{Deserialize, Serialize};

    use super::*;

    #[test]
    fn commit_round_trips_through_wire_form() {
        let commit = Commit {
            content: CommitContent {
                group_id: 42,
                epoch: 3,
                committer_leaf: 1,
                proposals: vec![
                    Proposal::Remove(RemoveProposal { leaf_index: 2 }),
                    Proposal::Update(UpdateProposal { leaf_index: 1 }),
                ],
                path: UpdatePath {
                    leaf_encryption_key: vec![0xAA; 32].into(),
                    entries: vec![PathSecretCiphertext {
                        recipient_leaf: 0,
                        sealed: vec![0xBB; 80].into(),
                    }],
                },
            },
            signature: vec![0xCC; 64].into(),
            confirmation_tag: vec![0xDD; 32].into(),
        };
        let bytes = commit.tls_serialize_detached().unwrap();
        let decoded = Commit::tls_deserialize_exact(&bytes).unwrap();
        assert_eq!(decoded, commit);
    }

    #[test]
    fn welcome_round_trips_through_wire_form() {
        let welcome = Welcome {
            suite_id: 0x0001,
            group_id: 7,
            epoch: 2,
            slot_count: 3,
            tree: vec![WelcomeLeaf {
                leaf_index: 0,
                user_id: 1001,
                encryption_key: vec![1; 32].into(),
                signature_key: vec![2; 32].into(),
            }],
            confirmed_transcript_hash: vec![3; 32].into(),
            interim_transcript_hash: vec![4; 32].into(),
            secrets: vec![EncryptedGroupSecrets {
                new_leaf: 2,
                key_package_ref: vec![5; 32].into(),
                sealed: vec![6; 90].into(),
            }],
            confirmation_tag: vec![7; 32].into(),
        };
        let bytes = welcome.tls_serialize_detached().unwrap();
        let decoded = Welcome::tls_deserialize_exact(&bytes).unwrap();
        assert_eq!(decoded, welcome);
    }

    #[test]
    fn proposal_decoding_rejects_unknown_discriminants() {
        let proposal = Proposal::Remove(RemoveProposal { leaf_index: 5 });
        let mut bytes = proposal.tls_serialize_detached().unwrap();
        // Corrupt the two-byte discriminant.
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        assert!(Proposal::tls_deserialize_exact(&bytes).is_err());
    }

    #[test]
    fn group_context_encoding_is_canonical() {
        let context = GroupContext {
            protocol_version: 1,
            suite_id: 0x0001,
            group_id: 9,
            epoch: 4,
            tree_hash: vec![0x11; 32].into(),
            confirmed_transcript_hash: vec![0x22; 32].into(),
        };
        let a = context.tls_serialize_detached().unwrap();
        let b = context.clone().tls_serialize_detached().unwrap();
        assert_eq!(a, b);
    }
}
