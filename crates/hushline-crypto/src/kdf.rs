//! Deterministic conversation key derivation using PBKDF2

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::CryptoError,
    key::{ConversationKey, KEY_LEN},
};

/// PBKDF2 iteration count. Part of the wire contract: both participants must
/// use the same value to arrive at the same key.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Derive the symmetric key for a conversation.
///
/// Participant ids are sorted (byte order) before combining, so both sides of
/// the conversation derive the identical key regardless of which one calls.
/// The password is `"{conversation_id}:{low_id}:{high_id}"` and the salt is
/// the conversation id bytes cycled to [`SALT_LEN`] bytes.
///
/// # Security
///
/// - Deterministic: same inputs always produce the same key
/// - No secret input: the key is recoverable by anyone who knows the ids
///
/// # Errors
///
/// - `KeyDerivation`: any identifier is empty or blank
pub fn derive_conversation_key(
    conversation_id: &str,
    participant_a: &str,
    participant_b: &str,
) -> Result<ConversationKey, CryptoError> {
    require(conversation_id, "conversation_id")?;
    require(participant_a, "participant_a")?;
    require(participant_b, "participant_b")?;

    let (low, high) = if participant_a <= participant_b {
        (participant_a, participant_b)
    } else {
        (participant_b, participant_a)
    };

    let password = Zeroizing::new(format!("{conversation_id}:{low}:{high}"));
    let salt = conversation_salt(conversation_id);

    let mut bytes = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, KDF_ITERATIONS, &mut bytes);

    let key = ConversationKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

fn require(value: &str, name: &'static str) -> Result<(), CryptoError> {
    if value.trim().is_empty() {
        return Err(CryptoError::KeyDerivation { missing: name });
    }
    Ok(())
}

/// Repeat the conversation id bytes until exactly [`SALT_LEN`] bytes.
///
/// Pre: `conversation_id` is non-empty (checked by the caller).
fn conversation_salt(conversation_id: &str) -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    for (slot, byte) in salt.iter_mut().zip(conversation_id.bytes().cycle()) {
        *slot = byte;
    }
    salt
}
