//! Envelope decoding errors.

use thiserror::Error;

/// Errors from decoding message content as an encryption envelope.
///
/// Receivers recover from every variant by showing the raw content string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Content is not JSON
    #[error("content is not json")]
    NotJson,

    /// JSON that does not claim to be encrypted (`encrypted` is not `true`)
    #[error("content is not an encryption envelope")]
    NotEnvelope,

    /// Envelope version other than the one this build understands
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(String),

    /// Envelope claims to be encrypted but fields are missing or mistyped
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// `ciphertext` field is not valid base64
    #[error("invalid ciphertext encoding: {0}")]
    InvalidCiphertext(String),
}

impl DecodeError {
    /// Returns true if the content looked like an envelope but could not be
    /// used.
    ///
    /// `NotJson` and `NotEnvelope` mean the content is legacy plaintext.
    pub fn is_undecodable_envelope(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion(_) | Self::Malformed(_) | Self::InvalidCiphertext(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_errors_are_not_undecodable_envelopes() {
        assert!(!DecodeError::NotJson.is_undecodable_envelope());
        assert!(!DecodeError::NotEnvelope.is_undecodable_envelope());
        assert!(DecodeError::UnsupportedVersion("2".into()).is_undecodable_envelope());
    }

    #[test]
    fn error_display() {
        let err = DecodeError::UnsupportedVersion("2".into());
        assert_eq!(err.to_string(), "unsupported envelope version: 2");
    }
}
