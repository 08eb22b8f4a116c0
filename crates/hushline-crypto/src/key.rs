//! Conversation key material

use std::fmt;

use zeroize::Zeroize;

/// Size of a conversation key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Symmetric AES-256-GCM key shared by the two participants of a
/// conversation.
///
/// Lives only in memory for the process lifetime. Never serialized, never
/// sent over the wire. Key bytes are zeroized on drop and redacted from
/// `Debug` output.
#[derive(Clone)]
pub struct ConversationKey {
    bytes: [u8; KEY_LEN],
}

impl ConversationKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes for the AEAD.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl PartialEq for ConversationKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for ConversationKey {}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConversationKey(<redacted>)")
    }
}

impl Drop for ConversationKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let key = ConversationKey::from_bytes([0xAB; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "ConversationKey(<redacted>)");
    }

    #[test]
    fn equality_compares_bytes() {
        let a = ConversationKey::from_bytes([1; KEY_LEN]);
        let b = ConversationKey::from_bytes([1; KEY_LEN]);
        let c = ConversationKey::from_bytes([2; KEY_LEN]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
