//! Incoming pipeline: message content to display-ready plaintext.
//!
//! # Flow
//!
//! ```text
//! Message ──► message cache hit? ──yes──► cached DecryptedMessage
//!                   │ no (single-flight per message id)
//!                   ▼
//!             classify(content)
//!   Legacy ─────────┼───────── Undecodable ──► raw text (warn)
//!                   │ Encrypted
//!                   ▼
//!       key_or_derive ──► open_text ──► media slot ──► cache
//! ```
//!
//! Failures stay scoped: a bad tag fails one message, a bad blob fails one
//! media slot. A key failure fails every message that needs the key and is
//! also reported once for the batch; legacy text still resolves.

use std::{collections::HashMap, sync::Arc};

use futures::{StreamExt as _, stream};
use hushline_core::ClientConfig;
use hushline_crypto::{Cipher, ConversationKey, NONCE_SIZE, TAG_SIZE};
use hushline_proto::{Conversation, EncryptedPayload, Message, MessageContent, MessageId, classify};

use crate::{
    cache::{DecryptionCache, MediaKey},
    collab::Storage,
    decrypted::{ContentOrigin, DecryptedMessage, MediaSlot},
    error::{KeyError, MediaError, ReceiveError},
    media::{FALLBACK_MEDIA_TYPE, MediaHandle},
};

/// Per-message results of a batch, keyed by message id.
pub type BatchResult = HashMap<MessageId, Result<DecryptedMessage, ReceiveError>>;

/// Outcome of [`ReceivePipeline::open_batch`].
#[derive(Debug, Clone, Default)]
pub struct DecryptedBatch {
    /// Result of every message in the batch
    pub results: BatchResult,
    /// Set if the conversation key could not be derived. Messages that needed
    /// it carry `KeyUnavailable` in `results`.
    pub key_error: Option<KeyError>,
}

/// Decrypts incoming messages through the shared cache.
pub struct ReceivePipeline<C, S> {
    cache: Arc<DecryptionCache>,
    cipher: Arc<C>,
    storage: Arc<S>,
    config: ClientConfig,
}

impl<C, S> Clone for ReceivePipeline<C, S> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            cipher: Arc::clone(&self.cipher),
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
        }
    }
}

impl<C: Cipher, S: Storage> ReceivePipeline<C, S> {
    /// Create a pipeline over a shared cache.
    pub fn new(
        cache: Arc<DecryptionCache>,
        cipher: Arc<C>,
        storage: Arc<S>,
        config: ClientConfig,
    ) -> Self {
        Self { cache, cipher, storage, config }
    }

    /// Cache this pipeline reads from and writes to.
    pub fn cache(&self) -> &Arc<DecryptionCache> {
        &self.cache
    }

    /// Display-ready content of one message.
    ///
    /// Concurrent calls for one message id share a single decryption. Only
    /// successful results are cached; a failed call may simply be repeated.
    ///
    /// # Errors
    ///
    /// - `ConversationMismatch`: `message` belongs to another conversation
    /// - `KeyUnavailable`: the conversation key could not be derived
    /// - `Decrypt`: the text failed authentication or is not UTF-8
    pub async fn open(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<DecryptedMessage, ReceiveError> {
        ensure_same_conversation(conversation, message)?;

        let pipeline = self.clone();
        let conversation_owned = conversation.clone();
        let message_owned = message.clone();

        self.cache
            .message_or_resolve(&conversation.id, &message.id, move || async move {
                pipeline.decrypt_uncached(&conversation_owned, &message_owned).await
            })
            .await
    }

    /// Decrypt a batch of messages concurrently.
    ///
    /// At most `batch_concurrency` decryptions run at once. Results are keyed
    /// by message id; per-message failures stay in the map. A key failure is
    /// surfaced in [`DecryptedBatch::key_error`] without dropping the results
    /// of messages that never needed the key.
    pub async fn open_batch(
        &self,
        conversation: &Conversation,
        messages: &[Message],
    ) -> DecryptedBatch {
        let results: Vec<(MessageId, Result<DecryptedMessage, ReceiveError>)> =
            stream::iter(messages)
                .map(|message| async move {
                    (message.id.clone(), self.open(conversation, message).await)
                })
                .buffer_unordered(self.config.batch_concurrency.max(1))
                .collect()
                .await;

        let mut batch = DecryptedBatch { results: HashMap::with_capacity(results.len()), key_error: None };
        for (id, result) in results {
            if let Err(ReceiveError::KeyUnavailable(err)) = &result {
                batch.key_error.get_or_insert_with(|| err.clone());
            }
            batch.results.insert(id, result);
        }

        tracing::debug!(
            conversation_id = %conversation.id,
            messages = batch.results.len(),
            failed = batch.results.values().filter(|result| result.is_err()).count(),
            key_unavailable = batch.key_error.is_some(),
            "decrypted batch"
        );

        batch
    }

    /// Re-resolve the media slot of a message whose attachment failed.
    ///
    /// Messages that are not cached are opened from scratch. Messages without
    /// a failed slot are returned as cached.
    ///
    /// # Errors
    ///
    /// Same as [`ReceivePipeline::open`].
    pub async fn retry_media(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<DecryptedMessage, ReceiveError> {
        ensure_same_conversation(conversation, message)?;

        let Some(cached) = self.cache.get_message(&message.id) else {
            return self.open(conversation, message).await;
        };
        if !cached.media.is_failed() {
            return Ok(cached);
        }

        let MessageContent::Encrypted(payload) = classify(&message.content) else {
            return Ok(cached);
        };

        let key = self
            .cache
            .key_or_derive(conversation)
            .await
            .map_err(ReceiveError::KeyUnavailable)?;
        let media = self.media_slot(conversation, message, &payload, key).await;

        tracing::debug!(
            message_id = %message.id,
            recovered = !media.is_failed(),
            "retried media slot"
        );

        Ok(self
            .cache
            .update_media(&message.id, media.clone())
            .unwrap_or(DecryptedMessage { media, ..cached }))
    }

    async fn decrypt_uncached(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<DecryptedMessage, ReceiveError> {
        let payload = match classify(&message.content) {
            MessageContent::Legacy => {
                return Ok(DecryptedMessage::legacy(
                    message.content.clone(),
                    message.media_url.clone(),
                ));
            },
            MessageContent::Undecodable(err) => {
                tracing::warn!(message_id = %message.id, error = %err, "showing undecodable envelope as raw text");
                return Ok(DecryptedMessage::undecodable(
                    message.content.clone(),
                    message.media_url.clone(),
                ));
            },
            MessageContent::Encrypted(payload) => payload,
        };

        let sealed = match payload.ciphertext_bytes() {
            Ok(sealed) => sealed,
            Err(err) => {
                tracing::warn!(message_id = %message.id, error = %err, "showing undecodable envelope as raw text");
                return Ok(DecryptedMessage::undecodable(
                    message.content.clone(),
                    message.media_url.clone(),
                ));
            },
        };

        let key = self
            .cache
            .key_or_derive(conversation)
            .await
            .map_err(ReceiveError::KeyUnavailable)?;

        let plaintext = self.cipher.open_text(&sealed, &key).map_err(|err| {
            tracing::warn!(message_id = %message.id, error = %err, "failed to decrypt message");
            ReceiveError::Decrypt(err)
        })?;

        let media = self.media_slot(conversation, message, &payload, key).await;

        Ok(DecryptedMessage { plaintext, origin: ContentOrigin::Encrypted, media })
    }

    async fn media_slot(
        &self,
        conversation: &Conversation,
        message: &Message,
        payload: &EncryptedPayload,
        key: Arc<ConversationKey>,
    ) -> MediaSlot {
        if !payload.declares_encrypted_media() {
            return message.media_url.clone().map_or(MediaSlot::None, MediaSlot::Remote);
        }

        let result = match &message.media_url {
            Some(url) => {
                let media_type =
                    payload.original_media_type.as_deref().unwrap_or(FALLBACK_MEDIA_TYPE);
                let media_key = MediaKey::new(conversation.id.clone(), url.clone());
                self.resolve_media(&media_key, media_type, key).await
            },
            None => Err(MediaError::Missing),
        };

        match result {
            Ok(handle) => MediaSlot::Local(handle),
            Err(err) => {
                tracing::warn!(message_id = %message.id, error = %err, "failed to resolve media");
                MediaSlot::Failed(err)
            },
        }
    }

    async fn resolve_media(
        &self,
        media_key: &MediaKey,
        media_type: &str,
        key: Arc<ConversationKey>,
    ) -> Result<MediaHandle, MediaError> {
        let storage = Arc::clone(&self.storage);
        let cipher = Arc::clone(&self.cipher);
        let url = media_key.remote_url.clone();
        let limit = self.config.max_media_bytes;

        self.cache
            .media_or_resolve(media_key, media_type, move || async move {
                let blob = storage.fetch(&url).await.map_err(MediaError::Fetch)?;

                let size = blob.len() as u64;
                if size > limit.saturating_add((NONCE_SIZE + TAG_SIZE) as u64) {
                    return Err(MediaError::TooLarge { size, limit });
                }

                cipher.open(&blob, &key).map_err(MediaError::Decrypt)
            })
            .await
    }
}

fn ensure_same_conversation(
    conversation: &Conversation,
    message: &Message,
) -> Result<(), ReceiveError> {
    if message.conversation_id == conversation.id {
        Ok(())
    } else {
        Err(ReceiveError::ConversationMismatch {
            expected: conversation.id.to_string(),
            actual: message.conversation_id.to_string(),
        })
    }
}
