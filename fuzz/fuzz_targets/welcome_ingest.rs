//! Fuzz target for welcome ingestion
//!
//! Feeds arbitrary byte sequences to `Group::from_welcome` with a real
//! pending key package (the join boundary an attacker can reach first).
//!
//! # Invariants
//!
//! - Garbage welcomes MUST be rejected (the sealed joiner secret and
//!   confirmation tag cannot be forged)
//! - A rejected welcome MUST NOT consume the key package bundle
//! - NEVER panic on arbitrary input

#![no_main]

use arbitrary::Arbitrary;
use davey::{Ciphersuite, GroupConfig, KeyPackage, KeyPackageBundle, SigningKeyPair, group::Group};
use libfuzzer_sys::fuzz_target;
use rand::{SeedableRng, rngs::StdRng};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: [u8; 32],
    welcome: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let signer = SigningKeyPair::from_seed(&input.seed);
    let mut rng = StdRng::from_seed(input.seed);
    let bundle = KeyPackageBundle::generate(1, Ciphersuite::default_suite(), 7, &signer, &mut rng)
        .unwrap();

    let result = Group::from_welcome(&input.welcome, &bundle, 1, 7, GroupConfig::default());
    assert!(result.is_err(), "garbage welcome must be rejected");

    // The bundle stays intact after a rejected welcome.
    let package = KeyPackage::decode(bundle.serialized()).unwrap();
    package.verify().unwrap();
});
