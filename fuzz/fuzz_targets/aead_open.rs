//! Fuzz target for AES-GCM open under adversarial input
//!
//! # Invariants
//!
//! - Opening arbitrary bytes never panics
//! - Arbitrary bytes never authenticate under a fixed key
//! - Sealed plaintext always round-trips; any single flipped byte fails

#![no_main]

use arbitrary::Arbitrary;
use hushline_crypto::{decrypt, encrypt, ConversationKey, NONCE_SIZE};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    key: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    plaintext: Vec<u8>,
    garbage: Vec<u8>,
    flip_at: usize,
}

fuzz_target!(|scenario: Scenario| {
    let key = ConversationKey::from_bytes(scenario.key);

    assert!(decrypt(&scenario.garbage, &key).is_err());

    let sealed = encrypt(&scenario.plaintext, &key, scenario.nonce);
    assert_eq!(decrypt(&sealed, &key).ok(), Some(scenario.plaintext.clone()));

    let mut tampered = sealed;
    let index = scenario.flip_at % tampered.len();
    tampered[index] ^= 0x01;
    assert!(decrypt(&tampered, &key).is_err());
});
