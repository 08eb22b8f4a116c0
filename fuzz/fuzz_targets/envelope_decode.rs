//! Fuzz target for message content classification
//!
//! Content strings come straight from the backend and may be anything:
//! legacy plaintext, envelopes from other versions, truncated JSON.
//!
//! # Invariants
//!
//! - Classification never panics
//! - `is_encrypted` agrees with `classify` for every decodable envelope
//! - A decoded payload re-encodes to an envelope that decodes to itself

#![no_main]

use hushline_proto::{classify, decode, is_encrypted, MessageContent};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };

    match classify(content) {
        MessageContent::Encrypted(payload) => {
            assert!(is_encrypted(content));

            let reencoded = payload.to_json();
            assert_eq!(decode(&reencoded).ok(), Some(payload.clone()));

            // Base64 errors are reported, never panicked on
            let _ = payload.ciphertext_bytes();
        },
        MessageContent::Legacy => assert!(!is_encrypted(content)),
        MessageContent::Undecodable(_) => {},
    }
});
