//! Error types for conversation crypto operations

use thiserror::Error;

/// Errors from key derivation and AEAD operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// A conversation or participant identifier was missing or blank
    #[error("key derivation failed: missing {missing}")]
    KeyDerivation {
        /// Name of the identifier that was missing
        missing: &'static str,
    },

    /// Authentication tag mismatch (wrong key, tampered or truncated data)
    #[error("authentication failed")]
    Authentication,

    /// Decrypted bytes are not valid UTF-8
    #[error("decrypted text is not valid utf-8")]
    InvalidUtf8,
}

impl CryptoError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Key derivation failures indicate a broken session or identity context
    /// and are surfaced to the caller. Authentication and UTF-8 failures are
    /// scoped to a single message or media item.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::KeyDerivation { .. } => true,

            // Scoped to one item - recovered locally
            Self::Authentication => false,
            Self::InvalidUtf8 => false,
        }
    }
}
