//! Per-sender frame key chain
//!
//! Every (epoch, sender) pair owns one [`FrameRatchet`]. The chain only
//! walks forward: each step emits a one-time [`FrameKey`] and replaces
//! the chain key, wiping the old link, so captured ratchet state cannot
//! recover keys for frames that were already sealed.
//!
//! Two HMAC-SHA256 calls separate the chain from its output. The `frame`
//! label produces the key handed to the AEAD and the `chain` label
//! produces the next link.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

const CHAIN_LABEL: &[u8] = b"chain";
const FRAME_LABEL: &[u8] = b"frame";

/// Upper bound on how many generations one call may fast-forward.
///
/// Caps the HMAC work a hostile generation counter can demand.
pub const MAX_SKIP: u32 = 1000;

/// One-time key for a single media frame.
///
/// Valid for exactly one seal or open, then dropped. Suites whose AEAD
/// takes a shorter key use a prefix of the 32 bytes. Wiped on drop.
#[derive(Clone)]
pub struct FrameKey {
    key: [u8; 32],
    generation: u32,
}

impl FrameKey {
    /// Key material, full width.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Generation this key was emitted at.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Drop for FrameKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameKey(generation {})", self.generation)
    }
}

/// Forward-only key chain for one sender within one epoch.
///
/// Seeded from the epoch's encryption secret. Two ratchets built from
/// the same seed emit the same key sequence, which is how sender and
/// receiver stay aligned without ever exchanging frame keys.
#[derive(Clone)]
pub struct FrameRatchet {
    chain_key: [u8; 32],
    generation: u32,
}

impl FrameRatchet {
    /// Starts a chain with `seed` as the first link, at generation 0.
    pub fn new(seed: &[u8; 32]) -> Self {
        Self { chain_key: *seed, generation: 0 }
    }

    /// Generation the next [`advance`](Self::advance) will emit.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Emits the current generation's key and steps the chain.
    ///
    /// # Errors
    ///
    /// [`CryptoError::GenerationOverflow`] once the counter is
    /// exhausted. The chain is unusable from then on.
    pub fn advance(&mut self) -> Result<FrameKey, CryptoError> {
        if self.generation == u32::MAX {
            return Err(CryptoError::GenerationOverflow { current: self.generation });
        }

        let key = FrameKey { key: self.derive(FRAME_LABEL), generation: self.generation };

        let next_link = self.derive(CHAIN_LABEL);
        self.chain_key.zeroize();
        self.chain_key = next_link;
        self.generation = self.generation.wrapping_add(1);

        Ok(key)
    }

    /// Fast-forwards the chain and emits the key for `target`.
    ///
    /// Keys passed over on the way are derived and dropped. A caller
    /// that needs them for out-of-order delivery must step one
    /// generation at a time and retain what it skips.
    ///
    /// # Errors
    ///
    /// [`CryptoError::RatchetTooFarBehind`] when `target` lies behind
    /// the chain or more than [`MAX_SKIP`] ahead of it.
    pub fn advance_to(&mut self, target: u32) -> Result<FrameKey, CryptoError> {
        if target < self.generation || target - self.generation > MAX_SKIP {
            return Err(CryptoError::RatchetTooFarBehind {
                current: self.generation,
                requested: target,
            });
        }
        while self.generation < target {
            self.advance()?;
        }
        self.advance()
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.chain_key) else {
            unreachable!("HMAC accepts any key length");
        };
        mac.update(label);
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

impl Drop for FrameRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}
