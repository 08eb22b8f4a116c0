//! Message and conversation records owned by the backend.

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, RemoteUrl, UserId};

/// Persisted direct message as delivered by the transport.
///
/// Read-only for the encryption core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Backend-assigned id. Stable cache identity.
    pub id: MessageId,

    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,

    /// Legacy plaintext or a serialized encryption envelope.
    pub content: String,

    /// Location of an attached blob, if any. Encrypted when the envelope says
    /// `mediaEncrypted`.
    pub media_url: Option<RemoteUrl>,

    /// Author of the message.
    pub sender_id: UserId,

    /// Backend timestamp (RFC 3339). Opaque to the core.
    pub created_at: String,
}

/// Direct-message conversation between exactly two participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id
    pub id: ConversationId,
    /// First participant
    pub participant_a: UserId,
    /// Second participant
    pub participant_b: UserId,
}

impl Conversation {
    /// Create a conversation record.
    pub fn new(
        id: impl Into<ConversationId>,
        participant_a: impl Into<UserId>,
        participant_b: impl Into<UserId>,
    ) -> Self {
        Self { id: id.into(), participant_a: participant_a.into(), participant_b: participant_b.into() }
    }

    /// Check if a user is one of the two participants.
    pub fn includes(&self, user: &UserId) -> bool {
        self.participant_a == *user || self.participant_b == *user
    }
}

/// Message handed to the transport for persistence and broadcast.
///
/// The transport answers with the authoritative [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target conversation
    pub conversation_id: ConversationId,
    /// Author
    pub sender_id: UserId,
    /// Serialized envelope
    pub content: String,
    /// Location of the uploaded encrypted blob
    pub media_url: Option<RemoteUrl>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_parses_backend_json() {
        let json = r#"{
            "id": "m-1",
            "conversation_id": "conv-1",
            "content": "hi",
            "media_url": null,
            "sender_id": "u-1",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();

        assert_eq!(message.id, MessageId::new("m-1"));
        assert_eq!(message.conversation_id.as_str(), "conv-1");
        assert!(message.media_url.is_none());
    }

    #[test]
    fn conversation_includes_participants_only() {
        let conversation = Conversation::new("conv-1", "u-a", "u-b");

        assert!(conversation.includes(&UserId::new("u-a")));
        assert!(conversation.includes(&UserId::new("u-b")));
        assert!(!conversation.includes(&UserId::new("u-c")));
    }
}
