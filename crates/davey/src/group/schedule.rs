//! Epoch key schedule and retained secret history.
//!
//! Each epoch transition folds the previous epoch's init secret together
//! with the tree's new commit secret, then binds the result to the full
//! group context:
//!
//! ```text
//! joiner secret = Extract(salt: prev init secret, ikm: commit secret)
//! epoch secret  = ExpandWithLabel(joiner secret, "epoch", H(group context))
//!                    |
//!                    +-- "authenticator" -> epoch authenticator
//!                    +-- "media"         -> media encryption secret
//!                    +-- "confirm"       -> confirmation key
//!                    +-- "init"          -> next epoch's init secret
//! ```
//!
//! New members receive the joiner secret through a welcome and run the
//! same expansion, so they converge on identical epoch secrets without
//! ever learning the previous init secret.
//!
//! # Security
//!
//! The history ring retains a bounded number of epochs for inbound media
//! that straddles a transition. Evicted entries drop their [`Secret`]
//! buffers, which zeroize on drop.

use std::collections::VecDeque;

use davey_crypto::{Secret, derive_secret, expand_with_label, extract};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Derived secrets for one epoch.
#[derive(Debug, Clone)]
pub struct EpochSecrets {
    /// Epoch these secrets belong to.
    pub epoch: u64,
    /// Proves all members agree on this epoch's transcript.
    pub authenticator: Secret,
    /// Seed for per-sender media ratchets.
    pub encryption_secret: Secret,
    /// Keys the confirmation tag on the epoch's commit.
    pub confirmation_key: Secret,
    /// Chains into the next epoch's joiner secret.
    pub init_secret: Secret,
}

impl EpochSecrets {
    /// Expands the joiner secret into a full secret set for `epoch`.
    ///
    /// `context` is the serialized group context of the new epoch. Its
    /// hash is folded into the expansion, so members with diverging
    /// trees or transcripts derive unrelated secrets.
    pub fn from_joiner(joiner: &Secret, context: &[u8], epoch: u64) -> Self {
        let context_hash = Sha256::digest(context);
        let Ok(epoch_secret) = expand_with_label(joiner, b"epoch", &context_hash, 32) else {
            unreachable!("32-byte expansion is always within the output bound")
        };
        Self {
            epoch,
            authenticator: derive_secret(&epoch_secret, b"authenticator"),
            encryption_secret: derive_secret(&epoch_secret, b"media"),
            confirmation_key: derive_secret(&epoch_secret, b"confirm"),
            init_secret: derive_secret(&epoch_secret, b"init"),
        }
    }
}

/// Folds the previous init secret and the commit secret into the joiner
/// secret for the next epoch.
pub fn joiner_secret(prev_init: &Secret, commit_secret: &Secret) -> Secret {
    extract(prev_init.as_slice(), commit_secret.as_slice())
}

/// MAC over the confirmed transcript hash under the confirmation key.
pub fn confirmation_tag(confirmation_key: &Secret, confirmed_transcript_hash: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(confirmation_key.as_slice()) else {
        unreachable!("HMAC accepts any key length")
    };
    mac.update(confirmed_transcript_hash);
    mac.finalize().into_bytes().into()
}

/// Verifies a received confirmation tag in constant time.
pub fn verify_confirmation_tag(
    confirmation_key: &Secret,
    confirmed_transcript_hash: &[u8],
    tag: &[u8],
) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(confirmation_key.as_slice()) else {
        unreachable!("HMAC accepts any key length")
    };
    mac.update(confirmed_transcript_hash);
    mac.verify_slice(tag).is_ok()
}

/// Bounded ring of epoch secrets, newest last.
///
/// Always holds at least the current epoch. Media decryption consults
/// older entries for frames that were in flight across a transition.
#[derive(Debug, Clone)]
pub struct EpochHistory {
    entries: VecDeque<EpochSecrets>,
    retain: usize,
}

impl EpochHistory {
    /// Creates a history seeded with the founding epoch's secrets.
    ///
    /// `retain` counts the current epoch, and is clamped to at least 1.
    pub fn new(first: EpochSecrets, retain: usize) -> Self {
        let mut entries = VecDeque::with_capacity(retain.max(1));
        entries.push_back(first);
        Self {
            entries,
            retain: retain.max(1),
        }
    }

    /// Appends a new current epoch, evicting entries beyond the
    /// retention bound.
    pub fn push(&mut self, secrets: EpochSecrets) {
        debug_assert!(
            secrets.epoch > self.current().epoch,
            "epochs must be pushed in order"
        );
        self.entries.push_back(secrets);
        while self.entries.len() > self.retain {
            self.entries.pop_front();
        }
    }

    /// Secrets of the current epoch.
    pub fn current(&self) -> &EpochSecrets {
        let Some(current) = self.entries.back() else {
            unreachable!("history always holds at least one epoch")
        };
        current
    }

    /// Secrets for `epoch`, if still retained.
    pub fn get(&self, epoch: u64) -> Option<&EpochSecrets> {
        self.entries.iter().find(|e| e.epoch == epoch)
    }

    /// All retained epochs, oldest first.
    pub fn epochs(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|e| e.epoch)
    }

    /// All retained epoch secrets, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &EpochSecrets> + '_ {
        self.entries.iter()
    }
}
