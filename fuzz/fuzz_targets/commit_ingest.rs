//! Fuzz target for commit ingestion
//!
//! Feeds arbitrary byte sequences to a live group's commit processing
//! (CRITICAL state transition boundary)
//!
//! # Strategy
//!
//! - Single delivery: each blob through `process_commit`
//! - Batch delivery: the whole set through `process_commits`
//!
//! # Invariants
//!
//! - Garbage commits MUST be rejected (no forged signature can pass)
//! - Rejected commits MUST NOT move the epoch, membership, or secrets
//! - The group MUST still accept a genuine commit afterwards
//! - NEVER panic on arbitrary input

#![no_main]

use arbitrary::Arbitrary;
use davey::{
    Ciphersuite, GroupConfig, SigningKeyPair,
    group::Group,
};
use libfuzzer_sys::fuzz_target;
use rand::{SeedableRng, rngs::StdRng};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: [u8; 32],
    commits: Vec<Vec<u8>>,
    as_batch: bool,
}

fuzz_target!(|input: FuzzInput| {
    let signer = SigningKeyPair::from_seed(&input.seed);
    let mut rng = StdRng::from_seed(input.seed);
    let mut group = Group::new_founding(
        Ciphersuite::default_suite(),
        1,
        0xF00D,
        7,
        signer.public_key(),
        GroupConfig::default(),
        &mut rng,
    );

    let epoch_before = group.epoch();
    let members_before = group.user_ids();
    let auth_before = group.epoch_authenticator().as_slice().to_vec();

    if input.as_batch {
        let result = group.process_commits(&input.commits);
        assert!(result.is_err(), "garbage batch must not produce a commit effect");
    } else {
        for bytes in &input.commits {
            let result = group.process_commit(bytes);
            assert!(result.is_err(), "garbage commit must be rejected");
        }
    }

    // Rejected input leaves the group exactly where it was.
    assert_eq!(group.epoch(), epoch_before);
    assert_eq!(group.user_ids(), members_before);
    assert_eq!(group.epoch_authenticator().as_slice(), &auth_before[..]);

    // The group must still be able to commit for real.
    group.queue_update();
    group.build_commit(&signer, &mut rng).unwrap();
    let new_epoch = group.merge_pending_commit().unwrap();
    assert_eq!(new_epoch, epoch_before + 1);
});
