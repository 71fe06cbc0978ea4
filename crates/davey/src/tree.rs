//! Ratchet tree: member leaves and the secret derivation path.
//!
//! Members occupy the leaves of a left-balanced binary tree. Each commit
//! injects a fresh path secret at the committer's leaf and chains it
//! through the committer's ancestors up to the root. The root value is
//! the commit secret that feeds the epoch key schedule, so every member
//! holding the path entry secret derives the same root.
//!
//! ```text
//!              7 <- root secret = commit secret
//!            /   \
//!          3       11
//!         / \     /  \
//!        1   5   9    13
//!       /|   |\  |\   | \
//!      0 2   4 6 8 10 12 14   <- leaves at even node indices
//! ```
//!
//! Leaf indices are stable: removing a member blanks its slot and the
//! next addition reuses the lowest vacant slot. Node indices follow the
//! array representation where leaf `i` sits at node `2i`.
//!
//! # Security
//!
//! Parent secrets are wiped on every membership change and repopulated
//! only by the next commit derivation. A removed member's leaf key can
//! never decrypt a later epoch's path entry because entries are sealed
//! per continuing member.

use davey_crypto::{Secret, expand_with_label};
use sha2::{Digest, Sha256};

use crate::errors::TreeError;

/// Domain separation prefix for tree hashes.
const TREE_HASH_LABEL: &[u8] = b"davey10 tree hash";

/// A member's leaf: identity plus public keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Identity of the member at this leaf.
    pub user_id: u64,
    /// X25519 public key path entries are sealed to.
    pub encryption_key: [u8; 32],
    /// Ed25519 public key commits from this leaf are verified under.
    pub signature_key: [u8; 32],
}

/// Number of trailing one bits, which is the node's height in the tree.
fn level(x: usize) -> usize {
    x.trailing_ones() as usize
}

/// Number of nodes in the array representation of a tree with `n` leaf
/// slots.
fn node_width(n: usize) -> usize {
    if n == 0 { 0 } else { 2 * (n - 1) + 1 }
}

/// Node index of the root.
fn root(n: usize) -> usize {
    debug_assert!(n > 0, "empty tree has no root");
    let w = node_width(n);
    (1 << (usize::BITS - 1 - w.leading_zeros())) - 1
}

/// Parent in the infinite balanced tree, ignoring the actual width.
fn parent_step(x: usize) -> usize {
    let k = level(x);
    let b = (x >> (k + 1)) & 1;
    (x | (1 << k)) ^ (b << (k + 1))
}

/// Parent of node `x` in a tree with `n` leaf slots.
///
/// Steps past phantom ancestors that fall outside the array width.
fn parent(x: usize, n: usize) -> usize {
    debug_assert_ne!(x, root(n), "root has no parent");
    let width = node_width(n);
    let mut p = parent_step(x);
    while p >= width {
        p = parent_step(p);
    }
    p
}

/// Node indices on the path from `x` (exclusive) to the root (inclusive).
fn direct_path(x: usize, n: usize) -> Vec<usize> {
    let r = root(n);
    let mut path = Vec::new();
    let mut cur = x;
    while cur != r {
        cur = parent(cur, n);
        path.push(cur);
    }
    path
}

/// The group's membership tree.
///
/// Leaf slots hold members; parent slots hold the secrets of the most
/// recent commit derivation. Only the committer's direct path carries
/// secrets at any time.
#[derive(Debug, Clone)]
pub struct RatchetTree {
    /// Leaf slots in index order. `None` marks a vacant slot.
    leaves: Vec<Option<LeafNode>>,
    /// Secrets for parent nodes. Slot `k` is node `2k + 1`.
    parent_secrets: Vec<Option<Secret>>,
    /// Maximum number of occupied leaves.
    max_leaves: usize,
}

impl RatchetTree {
    /// Creates an empty tree bounded at `max_leaves` members.
    pub fn new(max_leaves: usize) -> Self {
        Self {
            leaves: Vec::new(),
            parent_secrets: Vec::new(),
            max_leaves,
        }
    }

    /// Rebuilds a tree from exported leaf slots.
    ///
    /// # Errors
    ///
    /// - [`TreeError::CapacityExceeded`] if more members than
    ///   `max_leaves` are occupied.
    /// - [`TreeError::DuplicateMember`] if two slots share a user id.
    pub fn from_slots(
        slots: Vec<Option<LeafNode>>,
        max_leaves: usize,
    ) -> Result<Self, TreeError> {
        let occupied = slots.iter().flatten().count();
        if occupied > max_leaves {
            return Err(TreeError::CapacityExceeded {
                capacity: max_leaves,
            });
        }
        for (i, leaf) in slots.iter().flatten().enumerate() {
            for other in slots.iter().flatten().skip(i + 1) {
                if other.user_id == leaf.user_id {
                    return Err(TreeError::DuplicateMember {
                        user_id: leaf.user_id,
                    });
                }
            }
        }
        let parent_count = slots.len().saturating_sub(1);
        Ok(Self {
            leaves: slots,
            parent_secrets: vec![None; parent_count],
            max_leaves,
        })
    }

    /// Number of occupied leaves.
    pub fn member_count(&self) -> usize {
        self.leaves.iter().flatten().count()
    }

    /// Adds a member at the lowest vacant leaf and returns its index.
    ///
    /// # Errors
    ///
    /// - [`TreeError::DuplicateMember`] if the user already has a leaf.
    /// - [`TreeError::CapacityExceeded`] if the tree is full.
    pub fn add(&mut self, leaf: LeafNode) -> Result<u32, TreeError> {
        if self.leaf_of_user(leaf.user_id).is_some() {
            return Err(TreeError::DuplicateMember {
                user_id: leaf.user_id,
            });
        }
        if self.member_count() >= self.max_leaves {
            return Err(TreeError::CapacityExceeded {
                capacity: self.max_leaves,
            });
        }
        self.clear_parent_secrets();

        let index = match self.leaves.iter().position(Option::is_none) {
            Some(vacant) => {
                self.leaves[vacant] = Some(leaf);
                vacant
            },
            None => {
                self.leaves.push(Some(leaf));
                if self.leaves.len() > 1 {
                    self.parent_secrets.push(None);
                }
                self.leaves.len() - 1
            },
        };
        Ok(index as u32)
    }

    /// Removes the member at `leaf_index` and returns its leaf.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UnknownLeaf`] if the slot is vacant or out
    /// of range.
    pub fn remove(&mut self, leaf_index: u32) -> Result<LeafNode, TreeError> {
        let slot = self
            .leaves
            .get_mut(leaf_index as usize)
            .ok_or(TreeError::UnknownLeaf { leaf_index })?;
        let leaf = slot.take().ok_or(TreeError::UnknownLeaf { leaf_index })?;
        self.clear_parent_secrets();
        Ok(leaf)
    }

    /// The member at `leaf_index`, if that slot is occupied.
    pub fn leaf(&self, leaf_index: u32) -> Option<&LeafNode> {
        self.leaves.get(leaf_index as usize)?.as_ref()
    }

    /// The member at `leaf_index`, or [`TreeError::UnknownLeaf`].
    pub fn require_leaf(&self, leaf_index: u32) -> Result<&LeafNode, TreeError> {
        self.leaf(leaf_index)
            .ok_or(TreeError::UnknownLeaf { leaf_index })
    }

    /// Leaf index of the member with `user_id`.
    pub fn leaf_of_user(&self, user_id: u64) -> Option<u32> {
        self.occupied_leaves()
            .find(|(_, leaf)| leaf.user_id == user_id)
            .map(|(index, _)| index)
    }

    /// User ids of all members in leaf order.
    pub fn user_ids(&self) -> Vec<u64> {
        self.occupied_leaves()
            .map(|(_, leaf)| leaf.user_id)
            .collect()
    }

    /// Occupied leaves with their indices, in leaf order.
    pub fn occupied_leaves(&self) -> impl Iterator<Item = (u32, &LeafNode)> {
        self.leaves
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|leaf| (i as u32, leaf)))
    }

    /// Leaf slots including vacancies, for export into a welcome.
    pub fn slots(&self) -> &[Option<LeafNode>] {
        &self.leaves
    }

    /// Replaces the encryption key of the member at `leaf_index`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UnknownLeaf`] if the slot is vacant or out
    /// of range.
    pub fn set_encryption_key(
        &mut self,
        leaf_index: u32,
        encryption_key: [u8; 32],
    ) -> Result<(), TreeError> {
        let slot = self
            .leaves
            .get_mut(leaf_index as usize)
            .and_then(Option::as_mut)
            .ok_or(TreeError::UnknownLeaf { leaf_index })?;
        slot.encryption_key = encryption_key;
        Ok(())
    }

    /// Hash of the public tree state.
    ///
    /// Covers every slot including vacancies, so two trees with the same
    /// members at different indices hash differently.
    pub fn tree_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(TREE_HASH_LABEL);
        hasher.update((self.leaves.len() as u32).to_be_bytes());
        for slot in &self.leaves {
            match slot {
                Some(leaf) => {
                    hasher.update([1u8]);
                    hasher.update(leaf.user_id.to_be_bytes());
                    hasher.update(leaf.encryption_key);
                    hasher.update(leaf.signature_key);
                },
                None => hasher.update([0u8]),
            }
        }
        hasher.finalize().into()
    }

    /// Chains `entry` through the committer's direct path and returns
    /// the root value as the commit secret.
    ///
    /// Every member holding `entry` computes the same chain, so the
    /// commit secret is a deterministic function of the tree shape, the
    /// committer's leaf, and the entry secret.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UnknownLeaf`] if the committer's slot is
    /// vacant or out of range.
    pub fn derive_commit_secret(
        &mut self,
        committer_leaf: u32,
        entry: &Secret,
    ) -> Result<Secret, TreeError> {
        self.require_leaf(committer_leaf)?;
        self.clear_parent_secrets();

        let Ok(mut secret) = expand_with_label(entry, b"path", &[], 32) else {
            unreachable!("32-byte expansion is always within the output bound")
        };
        for node in direct_path(2 * committer_leaf as usize, self.leaves.len()) {
            let ctx = (node as u32).to_be_bytes();
            let Ok(next) = expand_with_label(&secret, b"node", &ctx, 32) else {
                unreachable!("32-byte expansion is always within the output bound")
            };
            self.parent_secrets[(node - 1) / 2] = Some(next.clone());
            secret = next;
        }
        Ok(secret)
    }

    /// Drops all parent secrets.
    ///
    /// Dropped secrets zeroize their buffers.
    pub fn clear_parent_secrets(&mut self) {
        for slot in &mut self.parent_secrets {
            *slot = None;
        }
    }
}
