//! Media frame encryption across sessions and epochs.
//!
//! These tests verify the data-path invariants:
//! - Frames round-trip between members, per media type
//! - Tampering and replay are rejected without poisoning the ratchet
//! - Frames from retained earlier epochs stay decryptable, evicted
//!   epochs do not
//! - Passthrough only ever applies to unencrypted frames

use std::time::Duration;

use davey::{
    Codec, DaveSession, DecryptError, GroupConfig, MediaType, SigningKeyPair,
    media::{FRAME_MAGIC, is_protocol_frame},
};
use rand::rngs::OsRng;

const CHANNEL: u64 = 0xDA7A;

fn joined_pair() -> (DaveSession, DaveSession) {
    let mut alice = DaveSession::new(1, 1, CHANNEL).unwrap();
    let mut bob = DaveSession::new(1, 2, CHANNEL).unwrap();
    alice.create_group().unwrap();
    let package = bob.create_key_package().unwrap();
    alice.propose_add(&package).unwrap();
    let messages = alice.commit_pending().unwrap();
    alice.process_commit(&messages.commit).unwrap();
    bob.process_welcome(messages.welcome.as_deref().unwrap()).unwrap();
    (alice, bob)
}

/// Rotates the committer's keys and delivers the commit to both.
fn advance_epoch(committer: &mut DaveSession, other: &mut DaveSession) {
    committer.propose_self_update().unwrap();
    let messages = committer.commit_pending().unwrap();
    committer.process_commit(&messages.commit).unwrap();
    other.process_commit(&messages.commit).unwrap();
}

#[test]
fn frames_round_trip_per_media_type() {
    let (mut alice, mut bob) = joined_pair();

    let audio = alice.encrypt(MediaType::Audio, Codec::Opus, b"audio bytes").unwrap();
    let video = alice.encrypt(MediaType::Video, Codec::Av1, b"video bytes").unwrap();
    assert!(is_protocol_frame(&audio));
    assert!(is_protocol_frame(&video));
    assert_eq!(u16::from_be_bytes([audio[0], audio[1]]), FRAME_MAGIC);

    assert_eq!(bob.decrypt(1, MediaType::Audio, &audio).unwrap(), b"audio bytes");
    assert_eq!(bob.decrypt(1, MediaType::Video, &video).unwrap(), b"video bytes");
}

#[test]
fn media_types_use_separate_key_streams() {
    let (mut alice, mut bob) = joined_pair();

    let video = alice.encrypt(MediaType::Video, Codec::Vp8, b"video frame").unwrap();

    // Feeding a video frame to the audio path must not decrypt.
    assert!(matches!(
        bob.decrypt(1, MediaType::Audio, &video),
        Err(DecryptError::DecryptionFailed)
    ));

    // The failed attempt did not consume the audio ratchet: a genuine
    // audio frame at the same generation still decrypts.
    let audio = alice.encrypt(MediaType::Audio, Codec::Opus, b"audio frame").unwrap();
    assert_eq!(bob.decrypt(1, MediaType::Audio, &audio).unwrap(), b"audio frame");
}

#[test]
fn tampered_frames_do_not_poison_the_ratchet() {
    let (mut alice, mut bob) = joined_pair();
    let frame = alice.encrypt_opus(b"genuine").unwrap();

    let mut tampered = frame.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    assert!(matches!(
        bob.decrypt(1, MediaType::Audio, &tampered),
        Err(DecryptError::DecryptionFailed)
    ));

    // The original still decrypts afterwards.
    assert_eq!(bob.decrypt(1, MediaType::Audio, &frame).unwrap(), b"genuine");

    let stats = bob.decryption_stats(1, Some(MediaType::Audio));
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.attempts, 2);
}

#[test]
fn out_of_order_frames_decrypt_from_the_skip_cache() {
    let (mut alice, mut bob) = joined_pair();
    let frames: Vec<Vec<u8>> = (0..4u8)
        .map(|i| alice.encrypt_opus(&[i; 16]).unwrap())
        .collect();

    // Newest first, then the stragglers in arbitrary order.
    assert_eq!(bob.decrypt(1, MediaType::Audio, &frames[3]).unwrap(), [3u8; 16]);
    assert_eq!(bob.decrypt(1, MediaType::Audio, &frames[1]).unwrap(), [1u8; 16]);
    assert_eq!(bob.decrypt(1, MediaType::Audio, &frames[0]).unwrap(), [0u8; 16]);
    assert_eq!(bob.decrypt(1, MediaType::Audio, &frames[2]).unwrap(), [2u8; 16]);
}

#[test]
fn replayed_frames_are_rejected() {
    let (mut alice, mut bob) = joined_pair();
    let frame = alice.encrypt_opus(b"once only").unwrap();

    assert_eq!(bob.decrypt(1, MediaType::Audio, &frame).unwrap(), b"once only");
    assert!(matches!(
        bob.decrypt(1, MediaType::Audio, &frame),
        Err(DecryptError::Crypto(_))
    ));
}

#[test]
fn retained_epochs_stay_decryptable_until_evicted() {
    let (mut alice, mut bob) = joined_pair();
    let old_frame = alice.encrypt_opus(b"from epoch one").unwrap();

    // One epoch later the frame is still within the retention window.
    advance_epoch(&mut alice, &mut bob);
    assert_eq!(alice.epoch(), Some(2));
    assert_eq!(bob.decrypt(1, MediaType::Audio, &old_frame).unwrap(), b"from epoch one");

    // Two more commits push epoch 1 out of the default window of three.
    advance_epoch(&mut alice, &mut bob);
    advance_epoch(&mut alice, &mut bob);
    assert_eq!(alice.epoch(), Some(4));
    assert!(matches!(
        bob.decrypt(1, MediaType::Audio, &old_frame),
        Err(DecryptError::UnknownEpoch { epoch: 1 })
    ));

    // The current epoch flows on unaffected.
    let fresh = alice.encrypt_opus(b"from epoch four").unwrap();
    assert_eq!(bob.decrypt(1, MediaType::Audio, &fresh).unwrap(), b"from epoch four");
}

#[test]
fn encryption_ratchet_restarts_on_each_epoch() {
    let (mut alice, mut bob) = joined_pair();
    let before = alice.encrypt_opus(b"one").unwrap();
    bob.decrypt(1, MediaType::Audio, &before).unwrap();

    advance_epoch(&mut alice, &mut bob);
    let after = alice.encrypt_opus(b"two").unwrap();
    assert_eq!(bob.decrypt(1, MediaType::Audio, &after).unwrap(), b"two");

    let stats = alice.encryption_stats(None);
    assert_eq!(stats.successes, 2);
    assert_eq!(stats.failures, 0);
}

#[test]
fn passthrough_stops_at_the_window_boundary() {
    let config = GroupConfig {
        passthrough_transition: Duration::ZERO,
        ..GroupConfig::default()
    };
    let signing = SigningKeyPair::generate(&mut OsRng);
    let mut bob = DaveSession::with_config(1, 2, CHANNEL, signing, config).unwrap();

    bob.set_passthrough_mode(true, None);
    assert_eq!(bob.decrypt(42, MediaType::Audio, b"plain").unwrap(), b"plain");
    let stats = bob.decryption_stats(42, Some(MediaType::Audio));
    assert_eq!(stats.passthroughs, 1);

    // The configured transition window is zero, so disabling cuts plain
    // frames off immediately.
    bob.set_passthrough_mode(false, None);
    assert!(!bob.can_passthrough(42));
    assert!(matches!(
        bob.decrypt(42, MediaType::Audio, b"plain"),
        Err(DecryptError::MalformedFrame { .. })
    ));
}

#[test]
fn passthrough_never_applies_to_protocol_frames() {
    let (mut alice, mut bob) = joined_pair();
    bob.set_passthrough_mode(true, None);

    // Encrypted traffic keeps decrypting normally while passthrough is
    // on for plain frames.
    let frame = alice.encrypt_opus(b"sealed").unwrap();
    assert_eq!(bob.decrypt(1, MediaType::Audio, &frame).unwrap(), b"sealed");

    // A forged protocol frame from a non-member is rejected, not
    // forwarded.
    let mut forged = frame.clone();
    forged[2] ^= 0xFF;
    assert!(bob.decrypt(42, MediaType::Audio, &forged).is_err());
}

#[test]
fn empty_frames_pass_through_unchanged() {
    let (mut alice, mut bob) = joined_pair();
    assert_eq!(alice.encrypt_opus(b"").unwrap(), Vec::<u8>::new());
    assert_eq!(bob.decrypt(1, MediaType::Audio, b"").unwrap(), Vec::<u8>::new());

    // Neither direction counts an empty frame as an attempt.
    assert_eq!(alice.encryption_stats(None).attempts, 0);
    assert_eq!(bob.decryption_stats(1, None).attempts, 0);
}
