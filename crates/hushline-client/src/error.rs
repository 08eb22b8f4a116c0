//! Error types for the send and receive pipelines.
//!
//! Only key failures ([`KeyError`]) indicate a broken session or identity
//! context and propagate beyond a single message. Everything else is scoped to
//! one message or one media slot.

use hushline_crypto::CryptoError;
use hushline_proto::RemoteUrl;
use thiserror::Error;

/// Conversation key could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Derivation rejected its inputs
    #[error(transparent)]
    Derivation(#[from] CryptoError),

    /// Derivation task was cancelled or panicked
    #[error("key derivation did not complete: {0}")]
    Interrupted(String),
}

/// Blob storage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Storage could not be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// No blob at the given location
    #[error("blob not found: {0}")]
    NotFound(RemoteUrl),

    /// Storage refused the request
    #[error("storage rejected request: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Returns true if the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Message transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transport could not be reached
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Backend refused to persist the message
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Failures isolated to a message's media slot.
///
/// The text of the same message still renders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// Envelope declares encrypted media but the message has no media URL
    #[error("message declares encrypted media but has no media url")]
    Missing,

    /// Encrypted blob could not be fetched
    #[error("media fetch failed: {0}")]
    Fetch(StorageError),

    /// Fetched blob is larger than the configured limit
    #[error("media blob of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Blob size
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// Blob failed authentication under the conversation key
    #[error("media decryption failed: {0}")]
    Decrypt(CryptoError),

    /// Decrypted bytes could not be turned into a local resource
    #[error("media materialization failed: {0}")]
    Materialize(String),

    /// Handle was released by a cache clear before the message was stored
    #[error("media handle was evicted before display")]
    Evicted,
}

impl MediaError {
    /// Returns true if retrying the media slot may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(err) => err.is_transient(),
            Self::Materialize(_) | Self::Evicted => true,
            Self::Missing | Self::TooLarge { .. } | Self::Decrypt(_) => false,
        }
    }
}

/// Failures of the outgoing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Sender is not a participant of the conversation
    #[error("sender is not a participant of the conversation")]
    NotParticipant,

    /// Conversation key could not be resolved
    #[error("conversation key unavailable: {0}")]
    KeyUnavailable(KeyError),

    /// Attachment exceeds the configured limit
    #[error("attachment of {size} bytes exceeds limit of {limit} bytes")]
    AttachmentTooLarge {
        /// Attachment size
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// Encrypted media upload failed
    #[error("upload failed: {0}")]
    Upload(StorageError),

    /// Transport did not persist the message
    #[error("transport failed: {0}")]
    Transport(TransportError),
}

impl SendError {
    /// Returns true if the user may retry the same draft.
    ///
    /// Upload and transport failures leave no partial state behind, so the
    /// same draft can be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upload(_) | Self::Transport(_))
    }
}

/// Failures of the incoming pipeline for one message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// Message belongs to a different conversation than the one given
    #[error("message belongs to conversation {actual}, expected {expected}")]
    ConversationMismatch {
        /// Conversation passed by the caller
        expected: String,
        /// Conversation on the message
        actual: String,
    },

    /// Conversation key could not be resolved
    #[error("conversation key unavailable: {0}")]
    KeyUnavailable(KeyError),

    /// Text failed authentication or is not UTF-8
    #[error("failed to decrypt: {0}")]
    Decrypt(CryptoError),
}

impl ReceiveError {
    /// Returns true if this error must propagate beyond the message.
    ///
    /// Only key failures qualify. Decryption failures are shown as a
    /// "failed to decrypt" state on the single message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KeyUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_key_failures_are_fatal() {
        let key = ReceiveError::KeyUnavailable(KeyError::Derivation(CryptoError::KeyDerivation {
            missing: "conversation_id",
        }));
        let auth = ReceiveError::Decrypt(CryptoError::Authentication);

        assert!(key.is_fatal());
        assert!(!auth.is_fatal());
    }

    #[test]
    fn upload_and_transport_failures_are_retryable() {
        assert!(SendError::Upload(StorageError::Unavailable("down".into())).is_retryable());
        assert!(SendError::Transport(TransportError::Rejected("no".into())).is_retryable());
        assert!(!SendError::NotParticipant.is_retryable());
        assert!(!SendError::AttachmentTooLarge { size: 2, limit: 1 }.is_retryable());
    }

    #[test]
    fn media_retry_classification() {
        assert!(MediaError::Fetch(StorageError::Unavailable("x".into())).is_retryable());
        assert!(!MediaError::Fetch(StorageError::NotFound(RemoteUrl::new("u"))).is_retryable());
        assert!(!MediaError::Decrypt(CryptoError::Authentication).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SendError::AttachmentTooLarge { size: 10, limit: 5 };
        assert_eq!(err.to_string(), "attachment of 10 bytes exceeds limit of 5 bytes");
    }
}
