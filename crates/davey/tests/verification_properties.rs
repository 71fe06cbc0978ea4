//! Property-based tests for verification codes
//!
//! These tests verify the fundamental invariants of the verification
//! pipeline:
//!
//! 1. **Determinism**: Same inputs always produce same fingerprints and codes
//! 2. **Truncation**: Short fingerprints are prefixes of the full digest
//! 3. **Uniqueness**: Different keys produce different fingerprints
//! 4. **Code shape**: Displayable codes are all-digit strings of the requested length
//! 5. **Group locality**: Each five-digit group depends only on its own five input bytes
//!
//! The scrypt-backed pairwise step is exercised by fixed-pair tests at
//! the bottom; property loops stay on the cheap primitives.

use davey::{
    SigningKeyPair,
    errors::CodeError,
    verification::{
        FINGERPRINT_FORMAT_VERSION, MAX_FINGERPRINT_LEN, PRIVACY_CODE_DIGITS,
        VERIFICATION_CODE_DIGITS, generate_displayable_code, generate_key_fingerprint,
        pairwise_fingerprint, privacy_code, session_code,
    },
};
use proptest::prelude::*;
use rand::rngs::OsRng;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_fingerprint_deterministic(
        version in 1u16..,
        key in prop::collection::vec(any::<u8>(), 1..64),
        truncate_len in 1usize..=MAX_FINGERPRINT_LEN,
    ) {
        let first = generate_key_fingerprint(version, &key, truncate_len).unwrap();
        let second = generate_key_fingerprint(version, &key, truncate_len).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), truncate_len);
    }

    #[test]
    fn prop_fingerprint_truncates_one_digest(
        version in 1u16..,
        key in prop::collection::vec(any::<u8>(), 1..64),
        truncate_len in 1usize..MAX_FINGERPRINT_LEN,
    ) {
        let full = generate_key_fingerprint(version, &key, MAX_FINGERPRINT_LEN).unwrap();
        let short = generate_key_fingerprint(version, &key, truncate_len).unwrap();

        prop_assert_eq!(&short[..], &full[..truncate_len]);
    }

    #[test]
    fn prop_fingerprint_distinguishes_keys(
        key_a in prop::collection::vec(any::<u8>(), 1..64),
        key_b in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        prop_assume!(key_a != key_b);

        let a = generate_key_fingerprint(1, &key_a, MAX_FINGERPRINT_LEN).unwrap();
        let b = generate_key_fingerprint(1, &key_b, MAX_FINGERPRINT_LEN).unwrap();

        prop_assert_ne!(a, b);
    }

    #[test]
    fn prop_fingerprint_rejects_oversized_truncation(
        version in 1u16..,
        key in prop::collection::vec(any::<u8>(), 1..64),
        truncate_len in (MAX_FINGERPRINT_LEN + 1)..128,
    ) {
        let result = generate_key_fingerprint(version, &key, truncate_len);
        prop_assert!(result.is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_code_is_digits_of_requested_length(
        data in prop::collection::vec(any::<u8>(), 45..100),
        groups in 1usize..=9,
    ) {
        let desired = groups * 5;
        let code = generate_displayable_code(&data, desired, 5).unwrap();

        prop_assert_eq!(code.len(), desired);
        prop_assert!(code.chars().all(|c| c.is_ascii_digit()));

        // Same data, same code.
        let again = generate_displayable_code(&data, desired, 5).unwrap();
        prop_assert_eq!(code, again);
    }

    #[test]
    fn prop_code_ignores_trailing_bytes(
        data in prop::collection::vec(any::<u8>(), 30..100),
        extra in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut extended = data.clone();
        extended.extend_from_slice(&extra);

        let base = privacy_code(&data).unwrap();
        let widened = privacy_code(&extended).unwrap();

        prop_assert_eq!(base, widened);
    }

    #[test]
    fn prop_code_groups_are_independent(
        data in prop::collection::vec(any::<u8>(), 30..=30),
        index in 0usize..30,
        mask in 1u8..,
    ) {
        let base = privacy_code(&data).unwrap();

        let mut mutated = data.clone();
        mutated[index] ^= mask;
        let changed = privacy_code(&mutated).unwrap();

        // Only the five-digit group holding the mutated byte may move.
        let touched = index / 5;
        for group in 0..PRIVACY_CODE_DIGITS / 5 {
            if group == touched {
                continue;
            }
            let span = group * 5..(group + 1) * 5;
            prop_assert_eq!(
                &base[span.clone()],
                &changed[span],
                "group {} moved when only group {} was touched",
                group,
                touched
            );
        }
    }

    #[test]
    fn prop_code_rejects_short_data(
        data in prop::collection::vec(any::<u8>(), 0..30),
    ) {
        let result = privacy_code(&data);
        prop_assert_eq!(
            result,
            Err(CodeError::DataTooShort {
                len: data.len(),
                required: PRIVACY_CODE_DIGITS,
            })
        );
    }
}

/// INVARIANT: The fingerprint digest and its decimal rendering never
/// drift from the published derivation.
#[test]
fn fingerprint_and_code_match_known_answer() {
    let print =
        generate_key_fingerprint(FINGERPRINT_FORMAT_VERSION, b"davey known answer key", 32)
            .unwrap();
    assert_eq!(
        print,
        hex::decode("68f283a2b896ab4b5525747802d9d909f9e56301599c69e385109cb29d5f91c2").unwrap()
    );
    assert_eq!(
        privacy_code(&print).unwrap(),
        "387281243821012831779970521392"
    );
}

/// INVARIANT: Both members of a pair derive the same 45-digit code no
/// matter which fingerprint they put first.
#[test]
fn session_code_survives_argument_order() {
    let a = generate_key_fingerprint(FINGERPRINT_FORMAT_VERSION, b"left key", 32).unwrap();
    let b = generate_key_fingerprint(FINGERPRINT_FORMAT_VERSION, b"right key", 32).unwrap();

    let ab = session_code(&pairwise_fingerprint(&a, &b)).unwrap();
    let ba = session_code(&pairwise_fingerprint(&b, &a)).unwrap();

    assert_eq!(ab, ba);
    assert_eq!(ab.len(), VERIFICATION_CODE_DIGITS);
    assert!(ab.chars().all(|c| c.is_ascii_digit()));
}

/// INVARIANT: Fresh signing keys flow through the whole pipeline and
/// come out as a full-width code.
#[test]
fn real_keys_produce_a_full_width_code() {
    let ours = SigningKeyPair::generate(&mut OsRng);
    let theirs = SigningKeyPair::generate(&mut OsRng);

    let our_print =
        generate_key_fingerprint(FINGERPRINT_FORMAT_VERSION, &ours.public_key(), 32).unwrap();
    let their_print =
        generate_key_fingerprint(FINGERPRINT_FORMAT_VERSION, &theirs.public_key(), 32).unwrap();

    let code = session_code(&pairwise_fingerprint(&our_print, &their_print)).unwrap();
    assert_eq!(code.len(), VERIFICATION_CODE_DIGITS);
    assert!(!code.chars().all(|c| c == '0'), "code must carry entropy");
}
