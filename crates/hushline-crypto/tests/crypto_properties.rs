//! Property-based tests for conversation crypto
//!
//! These tests verify the fundamental invariants of the crypto layer:
//!
//! 1. **Round-trip**: decrypt(encrypt(m)) == m for all messages
//! 2. **Order independence**: both participants derive the same key
//! 3. **Tamper detection**: any flipped byte is rejected
//! 4. **Isolation**: different conversations produce different keys

use hushline_crypto::{
    ConversationKey, CryptoError, KEY_LEN, NONCE_SIZE, decrypt, decrypt_text,
    derive_conversation_key, encrypt, encrypt_text,
};
use proptest::prelude::*;

fn key_from(bytes: Vec<u8>) -> ConversationKey {
    let mut arr = [0u8; KEY_LEN];
    arr.copy_from_slice(&bytes);
    ConversationKey::from_bytes(arr)
}

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,36}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_encrypt_decrypt_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..4096),
        key in prop::collection::vec(any::<u8>(), KEY_LEN..=KEY_LEN),
        nonce in any::<[u8; NONCE_SIZE]>(),
    ) {
        let key = key_from(key);
        let sealed = encrypt(&plaintext, &key, nonce);

        prop_assert_eq!(decrypt(&sealed, &key).unwrap(), plaintext);
    }

    #[test]
    fn prop_text_roundtrip(
        text in any::<String>(),
        nonce in any::<[u8; NONCE_SIZE]>(),
    ) {
        let key = ConversationKey::from_bytes([0x5A; KEY_LEN]);
        let sealed = encrypt_text(&text, &key, nonce);

        prop_assert_eq!(decrypt_text(&sealed, &key).unwrap(), text);
    }

    #[test]
    fn prop_single_bit_flip_is_rejected(
        plaintext in prop::collection::vec(any::<u8>(), 0..512),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = ConversationKey::from_bytes([0x33; KEY_LEN]);
        let mut sealed = encrypt(&plaintext, &key, [7; NONCE_SIZE]);

        let index = position.index(sealed.len());
        sealed[index] ^= 1 << bit;

        prop_assert_eq!(decrypt(&sealed, &key), Err(CryptoError::Authentication));
    }
}

proptest! {
    // PBKDF2 at 100k rounds is deliberately slow
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn prop_key_derivation_order_independent(
        conversation in id_strategy(),
        a in id_strategy(),
        b in id_strategy(),
    ) {
        let ab = derive_conversation_key(&conversation, &a, &b).unwrap();
        let ba = derive_conversation_key(&conversation, &b, &a).unwrap();

        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn prop_conversation_isolation(
        conversation in id_strategy(),
        a in id_strategy(),
        b in id_strategy(),
    ) {
        let other = format!("{conversation}x");
        let key = derive_conversation_key(&conversation, &a, &b).unwrap();
        let other_key = derive_conversation_key(&other, &a, &b).unwrap();

        let sealed = encrypt_text("hello", &key, [0; NONCE_SIZE]);
        prop_assert_eq!(decrypt_text(&sealed, &other_key), Err(CryptoError::Authentication));
    }
}
