//! Fuzz target for displayable code generation
//!
//! This fuzzer drives the decimal code formatter with arbitrary data,
//! lengths, and group sizes to find:
//! - Panics in the byte-to-digit reduction
//! - Outputs that are not all-digit or mis-sized
//! - Accepted parameter combinations that should have been rejected
//!
//! The fuzzer should NEVER panic. Invalid parameters should return an error.

#![no_main]

use davey::verification::generate_displayable_code;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (Vec<u8>, u8, u8)| {
    let (data, desired_length, group_size) = input;
    let desired_length = desired_length as usize;
    let group_size = group_size as usize;

    let Ok(code) = generate_displayable_code(&data, desired_length, group_size) else {
        return;
    };

    // An accepted call always yields exactly the requested digits.
    assert_eq!(code.len(), desired_length);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    assert!(group_size >= 1 && group_size <= 8);
    assert!(desired_length % group_size == 0);
    assert!(data.len() >= desired_length);
});
