//! Outgoing pipeline: draft to published envelope.
//!
//! ```text
//! Draft ──► key_or_derive ──► seal text ─────────────────────┐
//!             │                                              ▼
//!             └──► seal media ──► upload ──► url ──► envelope ──► publish
//! ```
//!
//! Nothing is cached until the transport has persisted the message, so a
//! failed upload or publish leaves no trace and the same draft can be sent
//! again.

use std::sync::Arc;

use hushline_core::{ClientConfig, Environment};
use hushline_crypto::Cipher;
use hushline_proto::{Conversation, EncryptedPayload, Message, OutgoingMessage, RemoteUrl, UserId};

use crate::{
    cache::{DecryptionCache, MediaKey},
    collab::{Storage, Transport},
    decrypted::{ContentOrigin, DecryptedMessage, MediaSlot},
    error::SendError,
};

/// Attachment bytes as picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Unencrypted content
    pub bytes: Vec<u8>,
    /// MIME type, carried in the envelope as `originalMediaType`
    pub media_type: String,
}

/// What the user typed and attached.
///
/// Kept by the caller until the send succeeds so a failed send can be
/// retried without retyping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    /// Message text
    pub text: String,
    /// Optional attachment
    pub attachment: Option<Attachment>,
}

impl Draft {
    /// Text-only draft.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), attachment: None }
    }

    /// Attach media to the draft.
    #[must_use]
    pub fn with_attachment(mut self, bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        self.attachment = Some(Attachment { bytes, media_type: media_type.into() });
        self
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Authoritative record returned by the transport
    pub message: Message,
    /// What the sender displays for it
    pub display: DecryptedMessage,
}

/// Former "server-side" second encryption layer.
///
/// Returns its input unchanged. Uploaded blobs carry exactly one layer of
/// ciphertext, which receivers open with the conversation key alone.
pub fn legacy_server_layer(sealed: Vec<u8>) -> Vec<u8> {
    sealed
}

/// Encrypts drafts and hands them to storage and transport.
pub struct SendPipeline<E, C, S, T> {
    env: E,
    cache: Arc<DecryptionCache>,
    cipher: Arc<C>,
    storage: Arc<S>,
    transport: Arc<T>,
    config: ClientConfig,
}

impl<E: Clone, C, S, T> Clone for SendPipeline<E, C, S, T> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            cache: Arc::clone(&self.cache),
            cipher: Arc::clone(&self.cipher),
            storage: Arc::clone(&self.storage),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

impl<E, C, S, T> SendPipeline<E, C, S, T>
where
    E: Environment,
    C: Cipher,
    S: Storage,
    T: Transport,
{
    /// Create a pipeline over a shared cache.
    pub fn new(
        env: E,
        cache: Arc<DecryptionCache>,
        cipher: Arc<C>,
        storage: Arc<S>,
        transport: Arc<T>,
        config: ClientConfig,
    ) -> Self {
        Self { env, cache, cipher, storage, transport, config }
    }

    /// Encrypt, upload and publish a draft.
    ///
    /// On success the sender's caches are seeded with the known plaintext and
    /// attachment, so the sender never fetches or decrypts its own message.
    ///
    /// # Errors
    ///
    /// - `NotParticipant`: `sender` is not part of `conversation`
    /// - `AttachmentTooLarge`: attachment exceeds `max_media_bytes`
    /// - `KeyUnavailable`: the conversation key could not be derived
    /// - `Upload`, `Transport`: collaborator failures; retryable, caches are
    ///   untouched
    pub async fn send(
        &self,
        conversation: &Conversation,
        sender: &UserId,
        draft: &Draft,
    ) -> Result<SentMessage, SendError> {
        if !conversation.includes(sender) {
            return Err(SendError::NotParticipant);
        }

        if let Some(attachment) = &draft.attachment {
            let size = attachment.bytes.len() as u64;
            let limit = self.config.max_media_bytes;
            if size > limit {
                return Err(SendError::AttachmentTooLarge { size, limit });
            }
        }

        let key = self
            .cache
            .key_or_derive(conversation)
            .await
            .map_err(SendError::KeyUnavailable)?;

        let sealed_text = self.cipher.seal_text(&draft.text, &key, self.env.random_array());
        let mut payload = EncryptedPayload::from_sealed(&sealed_text);

        let media_url = match &draft.attachment {
            Some(attachment) => {
                let sealed = legacy_server_layer(self.cipher.seal(
                    &attachment.bytes,
                    &key,
                    self.env.random_array(),
                ));

                let url = self.storage.upload(sealed).await.map_err(|err| {
                    tracing::warn!(conversation_id = %conversation.id, error = %err, "media upload failed");
                    SendError::Upload(err)
                })?;

                payload = payload.with_encrypted_media(attachment.media_type.clone());
                Some(url)
            },
            None => None,
        };

        let outgoing = OutgoingMessage {
            conversation_id: conversation.id.clone(),
            sender_id: sender.clone(),
            content: payload.to_json(),
            media_url,
        };

        let message = self.transport.publish(outgoing).await.map_err(|err| {
            tracing::warn!(conversation_id = %conversation.id, error = %err, "publish failed");
            SendError::Transport(err)
        })?;

        let display = self.seed_caches(conversation, &message, draft);

        tracing::debug!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            has_media = draft.attachment.is_some(),
            "sent encrypted message"
        );

        Ok(SentMessage { message, display })
    }

    fn seed_caches(
        &self,
        conversation: &Conversation,
        message: &Message,
        draft: &Draft,
    ) -> DecryptedMessage {
        let media = match (&draft.attachment, &message.media_url) {
            (Some(attachment), Some(url)) => self.seed_media(conversation, url, attachment),
            (_, url) => url.clone().map_or(MediaSlot::None, MediaSlot::Remote),
        };

        let display =
            DecryptedMessage { plaintext: draft.text.clone(), origin: ContentOrigin::Encrypted, media };

        self.cache.set_message(conversation.id.clone(), message.id.clone(), display.clone());
        self.cache.get_message(&message.id).unwrap_or(display)
    }

    fn seed_media(
        &self,
        conversation: &Conversation,
        url: &RemoteUrl,
        attachment: &Attachment,
    ) -> MediaSlot {
        match self.cache.materializer().materialize(attachment.bytes.clone(), &attachment.media_type) {
            Ok(handle) => {
                let key = MediaKey::new(conversation.id.clone(), url.clone());
                MediaSlot::Local(self.cache.set_media(key, handle))
            },
            // Receivers of this message fetch the blob; the sender can too
            Err(err) => {
                tracing::warn!(media_url = %url, error = %err, "failed to seed sent media");
                MediaSlot::Remote(url.clone())
            },
        }
    }
}
