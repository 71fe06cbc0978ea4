//! Fuzz target for KeyPackage::decode
//!
//! This fuzzer tests key package decoding with arbitrary byte sequences to find:
//! - Parser crashes or panics
//! - Integer overflows in length fields
//! - Buffer over-reads in the TLS deserializer
//! - Packages that decode but crash verification
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use davey::KeyPackage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, only return Err.
    let Ok(package) = KeyPackage::decode(data) else {
        return;
    };

    // A structurally valid package must survive inspection and
    // verification without panicking. Forged signatures must reject.
    let _ = package.user_id();
    let _ = package.suite_id();
    let _ = package.protocol_version();
    let _ = package.hash_ref();
    let _ = package.verify();
});
