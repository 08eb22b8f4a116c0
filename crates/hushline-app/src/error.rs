//! Messenger errors.

use hushline_client::{KeyError, SendError};
use hushline_core::ConfigError;
use hushline_proto::MessageId;
use thiserror::Error;

use crate::timeline::LocalId;

/// Failures surfaced by [`crate::Messenger`].
///
/// Per-message decryption failures are not errors at this level; they show
/// up as entry states in the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessengerError {
    /// Configuration rejected at construction
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No conversation is open
    #[error("no conversation is open")]
    NoConversation,

    /// Local user is not a participant of the conversation
    #[error("user is not a participant of the conversation")]
    NotParticipant,

    /// Send failed; the draft is kept on the timeline entry
    #[error("send of {local_id} failed: {error}")]
    Send {
        /// Optimistic entry that was marked failed
        local_id: LocalId,
        /// Pipeline error
        error: SendError,
    },

    /// No failed send with this id
    #[error("nothing to retry for {0}")]
    NothingToRetry(LocalId),

    /// No decrypted message with this id on the timeline
    #[error("message {0} is not on the timeline")]
    UnknownMessage(MessageId),

    /// Entry is not waiting for a fresh decryption attempt
    #[error("message {0} has not failed to decrypt")]
    NothingToDecrypt(MessageId),

    /// Conversation key could not be derived; nothing encrypted can be read
    #[error("conversation key unavailable: {0}")]
    Key(KeyError),
}

impl MessengerError {
    /// Returns true if the error invalidates the whole conversation view.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Key(_))
    }
}
