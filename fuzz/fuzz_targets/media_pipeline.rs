//! Fuzz target for the media frame pipeline
//!
//! Establishes a real two-member group, encrypts an arbitrary payload,
//! and replays it with arbitrary byte corruptions applied.
//!
//! # Invariants
//!
//! - An untouched frame MUST round-trip to the original payload
//! - Any corrupted frame MUST be rejected (header and payload are both
//!   bound by the AEAD)
//! - A rejected frame MUST NOT poison the ratchet for the genuine frame
//! - NEVER panic on arbitrary corruption patterns

#![no_main]

use arbitrary::Arbitrary;
use davey::{
    Ciphersuite, GroupConfig, KeyPackage, KeyPackageBundle, MediaType, SigningKeyPair,
    group::Group,
    media::{Decryptor, Encryptor},
};
use libfuzzer_sys::fuzz_target;
use rand::{SeedableRng, rngs::StdRng};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: [u8; 32],
    payload: Vec<u8>,
    corruptions: Vec<(u16, u8)>,
}

fuzz_target!(|input: FuzzInput| {
    let suite = Ciphersuite::default_suite();
    let mut rng = StdRng::from_seed(input.seed);

    // A real handshake: one founder, one member joined by welcome.
    let alice_signer = SigningKeyPair::generate(&mut rng);
    let mut alice = Group::new_founding(
        suite,
        1,
        0xDA7A,
        1,
        alice_signer.public_key(),
        GroupConfig::default(),
        &mut rng,
    );
    let bob_signer = SigningKeyPair::generate(&mut rng);
    let bundle = KeyPackageBundle::generate(1, suite, 2, &bob_signer, &mut rng).unwrap();
    alice
        .queue_add(KeyPackage::decode(bundle.serialized()).unwrap())
        .unwrap();
    let messages = alice.build_commit(&alice_signer, &mut rng).unwrap();
    alice.merge_pending_commit().unwrap();
    let bob = Group::from_welcome(
        &messages.welcome.unwrap(),
        &bundle,
        1,
        2,
        GroupConfig::default(),
    )
    .unwrap();

    let mut encryptor = Encryptor::new();
    let frame = encryptor
        .encrypt_frame(
            suite,
            alice.epoch_history().current(),
            alice.own_leaf_index(),
            MediaType::Audio,
            &input.payload,
            &mut rng,
        )
        .unwrap();

    let mut decryptor = Decryptor::new(false);
    let alice_leaf = bob.leaf_of_user(1).unwrap();
    let history = bob.epoch_history();

    if input.payload.is_empty() {
        assert!(frame.is_empty());
        let out = decryptor
            .decrypt_frame(suite, history, alice_leaf, MediaType::Audio, &frame)
            .unwrap();
        assert!(out.is_empty());
        return;
    }

    let mut corrupted = frame.clone();
    for &(offset, mask) in &input.corruptions {
        let index = offset as usize % corrupted.len();
        corrupted[index] ^= mask;
    }

    if corrupted == frame {
        // The corruption pattern cancelled out: the frame must round-trip.
        let out = decryptor
            .decrypt_frame(suite, history, alice_leaf, MediaType::Audio, &corrupted)
            .unwrap();
        assert_eq!(out, input.payload);
        return;
    }

    let result = decryptor.decrypt_frame(suite, history, alice_leaf, MediaType::Audio, &corrupted);
    assert!(result.is_err(), "corrupted frame must not decrypt");

    let out = decryptor
        .decrypt_frame(suite, history, alice_leaf, MediaType::Audio, &frame)
        .unwrap();
    assert_eq!(out, input.payload);
});
