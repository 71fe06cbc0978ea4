//! Media frame encryption: per-sender ratchets over the epoch secret.
//!
//! Every committed epoch yields one encryption secret. Each sender
//! expands it into a seed per media type, and a symmetric ratchet over
//! that seed produces one key per frame. The frame header carries
//! everything a receiver needs to find the same key:
//!
//! ```text
//! magic  epoch  sender leaf  generation  nonce tail   ciphertext
//! 2 B    8 B    4 B          4 B         4 B          n + 16 B
//! └──────────────── authenticated as AAD ─────────┘
//! ```
//!
//! Frames that do not start with the magic marker are passthrough
//! candidates: during protocol transitions the channel carries plain
//! frames, and the decryptor forwards them unmodified while passthrough
//! applies.
//!
//! # Security
//!
//! Frame keys are single use. Skipped keys for not-yet-seen generations
//! are cached in a bounded window so late frames still decrypt; the
//! cache evicts oldest first and every evicted key zeroizes on drop. A
//! frame is bound to its sender by two checks: the header leaf must
//! match the sender's current leaf, and the seed derivation folds the
//! leaf in, so a frame re-attributed to another member fails the AEAD.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use davey_crypto::{
    Ciphersuite, CryptoError, FrameKey, FrameRatchet, MAX_SKIP, Secret, aead, expand_with_label,
};

use crate::errors::{DecryptError, EncryptError};
use crate::group::schedule::{EpochHistory, EpochSecrets};

/// Marker prefixing every encrypted frame.
pub const FRAME_MAGIC: u16 = 0xFAFA;

/// Fixed frame header length in bytes.
const FRAME_HEADER_LEN: usize = 22;

/// Random bytes appended to the nonce per frame.
const NONCE_TAIL_LEN: usize = 4;

/// Skipped frame keys retained per sender ratchet for late frames.
const MAX_CACHED_FRAME_KEYS: usize = 128;

/// Kind of media a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Voice frames.
    Audio,
    /// Video frames.
    Video,
}

/// Codec of the frame payload.
///
/// Carried for callers that route frames by codec. Encryption covers
/// the whole payload regardless of codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Codec not known to the caller.
    Unknown,
    /// Opus audio.
    Opus,
    /// VP8 video.
    Vp8,
    /// VP9 video.
    Vp9,
    /// H.264 video.
    H264,
    /// H.265 video.
    H265,
    /// AV1 video.
    Av1,
}

/// Counters for one direction of media encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionStats {
    /// Frames encrypted successfully.
    pub successes: u32,
    /// Frames that failed to encrypt.
    pub failures: u32,
    /// Encryption calls attempted.
    pub attempts: u32,
    /// Most attempts any single frame needed.
    pub max_attempts: u32,
    /// Cumulative time spent encrypting, in microseconds.
    pub duration_micros: u32,
}

impl EncryptionStats {
    /// Combines counters from two encryptors, saturating on overflow.
    #[must_use]
    pub fn merged(self, other: Self) -> Self {
        Self {
            successes: self.successes.saturating_add(other.successes),
            failures: self.failures.saturating_add(other.failures),
            attempts: self.attempts.saturating_add(other.attempts),
            max_attempts: self.max_attempts.max(other.max_attempts),
            duration_micros: self.duration_micros.saturating_add(other.duration_micros),
        }
    }
}

/// Counters for one sender's frame decryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptionStats {
    /// Frames decrypted successfully.
    pub successes: u32,
    /// Frames that failed to decrypt.
    pub failures: u32,
    /// Decryption calls attempted.
    pub attempts: u32,
    /// Frames forwarded unmodified under passthrough.
    pub passthroughs: u32,
    /// Cumulative time spent decrypting, in microseconds.
    pub duration_micros: u32,
}

impl DecryptionStats {
    /// Combines counters from two media types, saturating on overflow.
    #[must_use]
    pub fn merged(self, other: Self) -> Self {
        Self {
            successes: self.successes.saturating_add(other.successes),
            failures: self.failures.saturating_add(other.failures),
            attempts: self.attempts.saturating_add(other.attempts),
            passthroughs: self.passthroughs.saturating_add(other.passthroughs),
            duration_micros: self.duration_micros.saturating_add(other.duration_micros),
        }
    }
}

/// Whether `frame` starts with the encrypted-frame marker.
#[must_use]
pub fn is_protocol_frame(frame: &[u8]) -> bool {
    FrameHeader::is_protocol_frame(frame)
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    epoch: u64,
    sender_leaf: u32,
    generation: u32,
    nonce_tail: [u8; NONCE_TAIL_LEN],
}

impl FrameHeader {
    /// Whether `frame` starts with the protocol magic.
    fn is_protocol_frame(frame: &[u8]) -> bool {
        frame.len() >= 2 && frame[..2] == FRAME_MAGIC.to_be_bytes()
    }

    /// Splits a frame into its header and ciphertext.
    ///
    /// Returns `None` if the frame is shorter than a full header.
    fn parse(frame: &[u8]) -> Option<(Self, &[u8])> {
        if frame.len() < FRAME_HEADER_LEN {
            return None;
        }
        let epoch = u64::from_be_bytes(frame[2..10].try_into().ok()?);
        let sender_leaf = u32::from_be_bytes(frame[10..14].try_into().ok()?);
        let generation = u32::from_be_bytes(frame[14..18].try_into().ok()?);
        let nonce_tail: [u8; NONCE_TAIL_LEN] = frame[18..22].try_into().ok()?;
        Some((
            Self {
                epoch,
                sender_leaf,
                generation,
                nonce_tail,
            },
            &frame[FRAME_HEADER_LEN..],
        ))
    }

    /// Serializes the header.
    fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[..2].copy_from_slice(&FRAME_MAGIC.to_be_bytes());
        out[2..10].copy_from_slice(&self.epoch.to_be_bytes());
        out[10..14].copy_from_slice(&self.sender_leaf.to_be_bytes());
        out[14..18].copy_from_slice(&self.generation.to_be_bytes());
        out[18..22].copy_from_slice(&self.nonce_tail);
        out
    }

    /// AEAD nonce for this frame.
    ///
    /// Each generation uses its key exactly once, so generation plus
    /// tail can never repeat under one key.
    fn nonce(&self) -> [u8; aead::NONCE_LEN] {
        let mut nonce = [0u8; aead::NONCE_LEN];
        nonce[..4].copy_from_slice(&self.generation.to_be_bytes());
        nonce[4..8].copy_from_slice(&self.nonce_tail);
        nonce
    }
}

/// Expands the epoch encryption secret into one sender's ratchet seed.
fn sender_seed(encryption_secret: &Secret, sender_leaf: u32, media_type: MediaType) -> Secret {
    let mut context = [0u8; 5];
    context[..4].copy_from_slice(&sender_leaf.to_be_bytes());
    context[4] = match media_type {
        MediaType::Audio => 0,
        MediaType::Video => 1,
    };
    let Ok(seed) = expand_with_label(encryption_secret, b"sender", &context, 32) else {
        unreachable!("32-byte expansion is always within the output bound")
    };
    seed
}

/// Builds a fresh frame ratchet from a sender seed.
fn ratchet_from_seed(seed: &Secret) -> FrameRatchet {
    let Ok(mut seed_bytes) = <[u8; 32]>::try_from(seed.as_slice()) else {
        unreachable!("sender seeds are always 32 bytes")
    };
    let ratchet = FrameRatchet::new(&seed_bytes);
    seed_bytes.zeroize();
    ratchet
}

/// Advances the ratchet once and seals `frame` under the fresh key.
fn seal_frame<R: RngCore + CryptoRng>(
    suite: Ciphersuite,
    ratchet: &mut FrameRatchet,
    epoch: u64,
    sender_leaf: u32,
    frame: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, CryptoError> {
    let key = ratchet.advance()?;
    let mut nonce_tail = [0u8; NONCE_TAIL_LEN];
    rng.fill_bytes(&mut nonce_tail);
    let header = FrameHeader {
        epoch,
        sender_leaf,
        generation: key.generation(),
        nonce_tail,
    };
    let header_bytes = header.encode();
    let ciphertext = aead::seal(
        suite,
        &key.key()[..suite.aead_key_len()],
        &header.nonce(),
        &header_bytes,
        frame,
    )?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// One sender's ratchet plus a bounded cache of skipped frame keys.
struct SenderRatchet {
    ratchet: FrameRatchet,
    skipped: VecDeque<FrameKey>,
}

impl SenderRatchet {
    fn new(seed: &Secret) -> Self {
        Self {
            ratchet: ratchet_from_seed(seed),
            skipped: VecDeque::new(),
        }
    }

    /// Takes the key for `generation`, advancing the ratchet forward and
    /// caching any skipped keys for late frames.
    fn key_for(&mut self, generation: u32) -> Result<FrameKey, CryptoError> {
        if generation < self.ratchet.generation() {
            // Late frame. The key is single use, so it is either still
            // in the skipped cache or gone for good.
            if let Some(pos) = self
                .skipped
                .iter()
                .position(|key| key.generation() == generation)
            {
                let Some(key) = self.skipped.remove(pos) else {
                    unreachable!("position came from the same deque")
                };
                return Ok(key);
            }
            return Err(CryptoError::RatchetTooFarBehind {
                current: self.ratchet.generation(),
                requested: generation,
            });
        }

        let skip = generation - self.ratchet.generation();
        if skip > MAX_SKIP {
            return Err(CryptoError::RatchetTooFarBehind {
                current: self.ratchet.generation(),
                requested: generation,
            });
        }
        loop {
            let key = self.ratchet.advance()?;
            if key.generation() == generation {
                return Ok(key);
            }
            self.cache(key);
        }
    }

    /// Returns an unused key to the cache after a failed decryption, so
    /// the genuine frame for that generation can still succeed.
    fn restore(&mut self, key: FrameKey) {
        self.cache(key);
    }

    fn cache(&mut self, key: FrameKey) {
        self.skipped.push_back(key);
        while self.skipped.len() > MAX_CACHED_FRAME_KEYS {
            self.skipped.pop_front();
        }
    }
}

/// Passthrough decision state.
///
/// Enabling applies immediately. Disabling opens a transition window
/// during which plain frames are still forwarded, covering senders that
/// have not finished switching to the protocol yet.
#[derive(Debug, Clone, Copy)]
pub struct Passthrough {
    enabled: bool,
    transition_until: Option<Instant>,
}

impl Passthrough {
    /// Starts with passthrough on or off and no transition window.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            transition_until: None,
        }
    }

    /// Switches passthrough, opening the transition window on disable.
    pub fn set(&mut self, enabled: bool, transition: Duration, now: Instant) {
        if enabled {
            self.enabled = true;
            self.transition_until = None;
        } else {
            if self.enabled {
                self.transition_until = Some(now + transition);
            }
            self.enabled = false;
        }
    }

    /// Whether a plain frame would currently be forwarded.
    pub fn allows(&self, now: Instant) -> bool {
        self.enabled || self.transition_until.is_some_and(|until| now < until)
    }
}

/// Outbound frame encryption for one media type.
pub struct Encryptor {
    epoch: Option<u64>,
    ratchet: Option<FrameRatchet>,
    stats: EncryptionStats,
}

impl Encryptor {
    /// Creates an encryptor with no ratchet state.
    pub fn new() -> Self {
        Self {
            epoch: None,
            ratchet: None,
            stats: EncryptionStats::default(),
        }
    }

    /// Counters for this encryptor.
    pub fn stats(&self) -> EncryptionStats {
        self.stats
    }

    /// Encrypts one frame under the current epoch.
    ///
    /// Empty frames pass through unchanged. The ratchet is rebuilt
    /// whenever the epoch has advanced since the previous frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptError::Crypto`] if the ratchet is exhausted or
    /// the AEAD rejects its inputs.
    pub fn encrypt_frame<R: RngCore + CryptoRng>(
        &mut self,
        suite: Ciphersuite,
        secrets: &EpochSecrets,
        own_leaf: u32,
        media_type: MediaType,
        frame: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, EncryptError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        self.stats.attempts = self.stats.attempts.saturating_add(1);
        self.stats.max_attempts = self.stats.max_attempts.max(1);

        if self.epoch != Some(secrets.epoch) || self.ratchet.is_none() {
            let seed = sender_seed(&secrets.encryption_secret, own_leaf, media_type);
            self.ratchet = Some(ratchet_from_seed(&seed));
            self.epoch = Some(secrets.epoch);
        }
        let Some(ratchet) = self.ratchet.as_mut() else {
            unreachable!("ratchet was installed above")
        };

        match seal_frame(suite, ratchet, secrets.epoch, own_leaf, frame, rng) {
            Ok(out) => {
                self.stats.successes = self.stats.successes.saturating_add(1);
                self.stats.duration_micros = self
                    .stats
                    .duration_micros
                    .saturating_add(elapsed_micros(started));
                Ok(out)
            },
            Err(e) => {
                self.stats.failures = self.stats.failures.saturating_add(1);
                Err(EncryptError::Crypto(e))
            },
        }
    }
}

impl Default for Encryptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound frame decryption for one sender.
pub struct Decryptor {
    ratchets: HashMap<(u64, MediaType), SenderRatchet>,
    passthrough: Passthrough,
    stats: HashMap<MediaType, DecryptionStats>,
}

impl Decryptor {
    /// Creates a decryptor with passthrough preset to the session mode.
    pub fn new(passthrough_enabled: bool) -> Self {
        Self {
            ratchets: HashMap::new(),
            passthrough: Passthrough::new(passthrough_enabled),
            stats: HashMap::new(),
        }
    }

    /// Counters for one media type.
    pub fn stats(&self, media_type: MediaType) -> DecryptionStats {
        self.stats.get(&media_type).copied().unwrap_or_default()
    }

    /// Passthrough state for this sender.
    pub fn passthrough(&self) -> &Passthrough {
        &self.passthrough
    }

    /// Mutable passthrough state for this sender.
    pub fn passthrough_mut(&mut self) -> &mut Passthrough {
        &mut self.passthrough
    }

    /// Forwards a plain frame if passthrough applies.
    ///
    /// Used for senders without a resolvable leaf as well, since plain
    /// frames need no group state at all.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::MalformedFrame`] once passthrough and its
    /// transition window no longer apply.
    pub fn forward_plain(
        &mut self,
        media_type: MediaType,
        frame: &[u8],
    ) -> Result<Vec<u8>, DecryptError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let now = Instant::now();
        let stats = self.stats.entry(media_type).or_default();
        if self.passthrough.allows(now) {
            stats.passthroughs = stats.passthroughs.saturating_add(1);
            return Ok(frame.to_vec());
        }
        stats.attempts = stats.attempts.saturating_add(1);
        stats.failures = stats.failures.saturating_add(1);
        Err(DecryptError::MalformedFrame {
            reason: "missing frame marker",
        })
    }

    /// Records a rejected protocol frame that never reached a ratchet.
    pub(crate) fn record_failure(&mut self, media_type: MediaType) {
        let stats = self.stats.entry(media_type).or_default();
        stats.attempts = stats.attempts.saturating_add(1);
        stats.failures = stats.failures.saturating_add(1);
    }

    /// Decrypts one frame from this sender.
    ///
    /// Plain frames are forwarded unmodified while passthrough applies.
    /// Protocol frames must name a retained epoch and the sender's
    /// current leaf; the ratchet catches up forward within the skip
    /// window and serves late frames from the skipped-key cache.
    ///
    /// # Errors
    ///
    /// - [`DecryptError::MalformedFrame`] for plain frames outside
    ///   passthrough, truncated headers, or a leaf mismatch.
    /// - [`DecryptError::UnknownEpoch`] if the epoch is not retained.
    /// - [`DecryptError::DecryptionFailed`] if the AEAD rejects the
    ///   frame.
    /// - [`DecryptError::Crypto`] if the generation is outside the
    ///   ratchet's reach.
    pub fn decrypt_frame(
        &mut self,
        suite: Ciphersuite,
        history: &EpochHistory,
        expected_leaf: u32,
        media_type: MediaType,
        frame: &[u8],
    ) -> Result<Vec<u8>, DecryptError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        if !FrameHeader::is_protocol_frame(frame) {
            return self.forward_plain(media_type, frame);
        }
        let started = Instant::now();
        let stats = self.stats.entry(media_type).or_default();
        stats.attempts = stats.attempts.saturating_add(1);
        let Some((header, ciphertext)) = FrameHeader::parse(frame) else {
            stats.failures = stats.failures.saturating_add(1);
            return Err(DecryptError::MalformedFrame {
                reason: "truncated frame header",
            });
        };
        if header.sender_leaf != expected_leaf {
            stats.failures = stats.failures.saturating_add(1);
            return Err(DecryptError::MalformedFrame {
                reason: "sender leaf does not match the frame header",
            });
        }
        let Some(secrets) = history.get(header.epoch) else {
            stats.failures = stats.failures.saturating_add(1);
            return Err(DecryptError::UnknownEpoch {
                epoch: header.epoch,
            });
        };

        if !self.ratchets.contains_key(&(header.epoch, media_type)) {
            // Drop ratchets for epochs the history has already evicted.
            self.ratchets
                .retain(|(epoch, _), _| history.get(*epoch).is_some());
            let seed = sender_seed(&secrets.encryption_secret, header.sender_leaf, media_type);
            self.ratchets
                .insert((header.epoch, media_type), SenderRatchet::new(&seed));
        }
        let Some(ratchet) = self.ratchets.get_mut(&(header.epoch, media_type)) else {
            unreachable!("ratchet was installed above")
        };
        let stats = self.stats.entry(media_type).or_default();

        let key = match ratchet.key_for(header.generation) {
            Ok(key) => key,
            Err(e) => {
                stats.failures = stats.failures.saturating_add(1);
                return Err(DecryptError::Crypto(e));
            },
        };
        match aead::open(
            suite,
            &key.key()[..suite.aead_key_len()],
            &header.nonce(),
            &frame[..FRAME_HEADER_LEN],
            ciphertext,
        ) {
            Ok(plaintext) => {
                stats.successes = stats.successes.saturating_add(1);
                stats.duration_micros =
                    stats.duration_micros.saturating_add(elapsed_micros(started));
                Ok(plaintext)
            },
            Err(_) => {
                ratchet.restore(key);
                stats.failures = stats.failures.saturating_add(1);
                Err(DecryptError::DecryptionFailed)
            },
        }
    }
}

/// Elapsed time since `started` in microseconds, saturating at `u32::MAX`.
fn elapsed_micros(started: Instant) -> u32 {
    u32::try_from(started.elapsed().as_micros()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn test_secrets(epoch: u64) -> EpochSecrets {
        EpochSecrets {
            epoch,
            authenticator: Secret::from_slice(&[1; 32]),
            encryption_secret: Secret::from_slice(&[epoch as u8 ^ 0x5A; 32]),
            confirmation_key: Secret::from_slice(&[3; 32]),
            init_secret: Secret::from_slice(&[4; 32]),
        }
    }

    fn suite() -> Ciphersuite {
        Ciphersuite::default_suite()
    }

    #[test]
    fn header_round_trips_and_nonce_is_stable() {
        let header = FrameHeader {
            epoch: 9,
            sender_leaf: 3,
            generation: 77,
            nonce_tail: [0xAA, 0xBB, 0xCC, 0xDD],
        };
        let bytes = header.encode();
        assert!(FrameHeader::is_protocol_frame(&bytes));
        let (parsed, rest) = FrameHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert!(rest.is_empty());

        let nonce = header.nonce();
        assert_eq!(&nonce[..4], &77u32.to_be_bytes());
        assert_eq!(&nonce[4..8], &header.nonce_tail);
        assert_eq!(&nonce[8..], &[0u8; 4]);
    }

    #[test]
    fn frames_round_trip_between_encryptor_and_decryptor() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets.clone(), 3);
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        for payload in [&b"voice a"[..], b"voice b", b"voice c"] {
            let frame = encryptor
                .encrypt_frame(suite(), &secrets, 2, MediaType::Audio, payload, &mut OsRng)
                .unwrap();
            assert!(FrameHeader::is_protocol_frame(&frame));
            let plain = decryptor
                .decrypt_frame(suite(), &history, 2, MediaType::Audio, &frame)
                .unwrap();
            assert_eq!(plain, payload);
        }
        assert_eq!(encryptor.stats().successes, 3);
        assert_eq!(decryptor.stats(MediaType::Audio).successes, 3);
        assert_eq!(decryptor.stats(MediaType::Audio).failures, 0);
    }

    #[test]
    fn empty_frames_pass_unchanged() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets.clone(), 3);
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        let sealed = encryptor
            .encrypt_frame(suite(), &secrets, 0, MediaType::Audio, b"", &mut OsRng)
            .unwrap();
        assert!(sealed.is_empty());
        let plain = decryptor
            .decrypt_frame(suite(), &history, 0, MediaType::Audio, b"")
            .unwrap();
        assert!(plain.is_empty());
        assert_eq!(encryptor.stats().attempts, 0);
        assert_eq!(decryptor.stats(MediaType::Audio).attempts, 0);
    }

    #[test]
    fn audio_and_video_use_separate_key_streams() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets.clone(), 3);
        let mut audio = Encryptor::new();
        let mut video = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        let audio_frame = audio
            .encrypt_frame(suite(), &secrets, 0, MediaType::Audio, b"frame", &mut OsRng)
            .unwrap();
        let video_frame = video
            .encrypt_frame(suite(), &secrets, 0, MediaType::Video, b"frame", &mut OsRng)
            .unwrap();

        // A frame sealed for one media type cannot open as the other.
        let err = decryptor
            .decrypt_frame(suite(), &history, 0, MediaType::Video, &audio_frame)
            .unwrap_err();
        assert_eq!(err, DecryptError::DecryptionFailed);
        decryptor
            .decrypt_frame(suite(), &history, 0, MediaType::Video, &video_frame)
            .unwrap();
        decryptor
            .decrypt_frame(suite(), &history, 0, MediaType::Audio, &audio_frame)
            .unwrap();
    }

    #[test]
    fn out_of_order_frames_decrypt_from_the_skip_cache() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets.clone(), 3);
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        let first = encryptor
            .encrypt_frame(suite(), &secrets, 1, MediaType::Audio, b"one", &mut OsRng)
            .unwrap();
        let second = encryptor
            .encrypt_frame(suite(), &secrets, 1, MediaType::Audio, b"two", &mut OsRng)
            .unwrap();
        let third = encryptor
            .encrypt_frame(suite(), &secrets, 1, MediaType::Audio, b"three", &mut OsRng)
            .unwrap();

        // Deliver newest first, then the stragglers.
        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 1, MediaType::Audio, &third)
                .unwrap(),
            b"three"
        );
        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 1, MediaType::Audio, &first)
                .unwrap(),
            b"one"
        );
        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 1, MediaType::Audio, &second)
                .unwrap(),
            b"two"
        );

        // Frame keys are single use: replaying a consumed frame fails.
        let err = decryptor
            .decrypt_frame(suite(), &history, 1, MediaType::Audio, &first)
            .unwrap_err();
        assert!(matches!(err, DecryptError::Crypto(_)));
    }

    #[test]
    fn tampered_frame_keeps_its_key_for_the_genuine_copy() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets.clone(), 3);
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        let frame = encryptor
            .encrypt_frame(suite(), &secrets, 0, MediaType::Audio, b"real", &mut OsRng)
            .unwrap();
        let mut forged = frame.clone();
        let last = forged.len() - 1;
        forged[last] ^= 0x01;

        let err = decryptor
            .decrypt_frame(suite(), &history, 0, MediaType::Audio, &forged)
            .unwrap_err();
        assert_eq!(err, DecryptError::DecryptionFailed);

        // The restored key still opens the genuine frame.
        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 0, MediaType::Audio, &frame)
                .unwrap(),
            b"real"
        );
    }

    #[test]
    fn leaf_mismatch_is_rejected_before_key_derivation() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets.clone(), 3);
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        let frame = encryptor
            .encrypt_frame(suite(), &secrets, 4, MediaType::Audio, b"frame", &mut OsRng)
            .unwrap();
        let err = decryptor
            .decrypt_frame(suite(), &history, 5, MediaType::Audio, &frame)
            .unwrap_err();
        assert_eq!(
            err,
            DecryptError::MalformedFrame {
                reason: "sender leaf does not match the frame header"
            }
        );
    }

    #[test]
    fn unknown_epoch_is_rejected() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets.clone(), 3);
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        let future = test_secrets(9);
        let frame = encryptor
            .encrypt_frame(suite(), &future, 0, MediaType::Audio, b"frame", &mut OsRng)
            .unwrap();
        let err = decryptor
            .decrypt_frame(suite(), &history, 0, MediaType::Audio, &frame)
            .unwrap_err();
        assert_eq!(err, DecryptError::UnknownEpoch { epoch: 9 });
    }

    #[test]
    fn frames_from_retained_epochs_still_decrypt() {
        let old = test_secrets(1);
        let mut history = EpochHistory::new(old.clone(), 3);
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        let old_frame = encryptor
            .encrypt_frame(suite(), &old, 0, MediaType::Audio, b"behind", &mut OsRng)
            .unwrap();

        let new = test_secrets(2);
        history.push(new.clone());
        let new_frame = encryptor
            .encrypt_frame(suite(), &new, 0, MediaType::Audio, b"ahead", &mut OsRng)
            .unwrap();

        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 0, MediaType::Audio, &new_frame)
                .unwrap(),
            b"ahead"
        );
        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 0, MediaType::Audio, &old_frame)
                .unwrap(),
            b"behind"
        );
    }

    #[test]
    fn passthrough_forwards_plain_frames_within_the_window() {
        let secrets = test_secrets(1);
        let history = EpochHistory::new(secrets, 3);
        let mut decryptor = Decryptor::new(true);

        let plain = b"not a protocol frame".to_vec();
        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 0, MediaType::Audio, &plain)
                .unwrap(),
            plain
        );
        assert_eq!(decryptor.stats(MediaType::Audio).passthroughs, 1);

        // Disabling with a zero window rejects immediately.
        decryptor
            .passthrough_mut()
            .set(false, Duration::ZERO, Instant::now());
        let err = decryptor
            .decrypt_frame(suite(), &history, 0, MediaType::Audio, &plain)
            .unwrap_err();
        assert_eq!(
            err,
            DecryptError::MalformedFrame {
                reason: "missing frame marker"
            }
        );
    }

    #[test]
    fn passthrough_transition_window_expires() {
        let mut passthrough = Passthrough::new(true);
        let now = Instant::now();
        passthrough.set(false, Duration::from_secs(10), now);

        assert!(passthrough.allows(now));
        assert!(passthrough.allows(now + Duration::from_secs(9)));
        assert!(!passthrough.allows(now + Duration::from_secs(10)));

        // Re-enabling clears the window.
        passthrough.set(true, Duration::ZERO, now);
        assert!(passthrough.allows(now + Duration::from_secs(60)));
    }

    #[test]
    fn disabling_twice_does_not_reopen_the_window() {
        let mut passthrough = Passthrough::new(true);
        let now = Instant::now();
        passthrough.set(false, Duration::from_secs(5), now);
        // A second disable later must not extend the original window.
        passthrough.set(false, Duration::from_secs(5), now + Duration::from_secs(4));
        assert!(!passthrough.allows(now + Duration::from_secs(6)));
    }

    #[test]
    fn sender_ratchet_enforces_the_skip_bound() {
        let seed = Secret::from_slice(&[7; 32]);
        let mut ratchet = SenderRatchet::new(&seed);
        assert!(ratchet.key_for(MAX_SKIP + 1).is_err());
        ratchet.key_for(5).unwrap();
        // Generations 0..=4 were cached for late frames.
        ratchet.key_for(0).unwrap();
        ratchet.key_for(4).unwrap();
        assert!(ratchet.key_for(4).is_err());
    }

    #[test]
    fn encryptor_rebuilds_its_ratchet_on_epoch_change() {
        let first = test_secrets(1);
        let second = test_secrets(2);
        let history = {
            let mut h = EpochHistory::new(first.clone(), 3);
            h.push(second.clone());
            h
        };
        let mut encryptor = Encryptor::new();
        let mut decryptor = Decryptor::new(false);

        encryptor
            .encrypt_frame(suite(), &first, 0, MediaType::Audio, b"a", &mut OsRng)
            .unwrap();
        let frame = encryptor
            .encrypt_frame(suite(), &second, 0, MediaType::Audio, b"b", &mut OsRng)
            .unwrap();
        let (header, _) = FrameHeader::parse(&frame).unwrap();
        // Fresh epoch, fresh ratchet: the generation restarts at zero.
        assert_eq!(header.generation, 0);
        assert_eq!(header.epoch, 2);
        assert_eq!(
            decryptor
                .decrypt_frame(suite(), &history, 0, MediaType::Audio, &frame)
                .unwrap(),
            b"b"
        );
    }
}
