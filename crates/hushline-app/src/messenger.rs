//! Messenger: owns the shared cache and both pipelines for one signed-in
//! user, and keeps the open conversation's timeline in sync with them.
//!
//! Cache lifetime follows the user's navigation:
//!
//! - opening a different conversation clears the previous one's scope
//! - re-opening the active conversation (a re-render) clears nothing
//! - logout clears everything

use std::sync::Arc;

use hushline_client::{
    DecryptedBatch, DecryptionCache, Draft, MediaMaterializer, ReceiveError, ReceivePipeline,
    SendPipeline, Storage, Transport,
};
use hushline_core::{ClientConfig, Environment};
use hushline_crypto::Cipher;
use hushline_proto::{Conversation, Message, MessageId, UserId};

use crate::{
    error::MessengerError,
    timeline::{EntryState, LocalId, Timeline},
};

/// Session-scoped entry point for a host UI.
pub struct Messenger<E, C, S, T> {
    env: E,
    user: UserId,
    cache: Arc<DecryptionCache>,
    sender: SendPipeline<E, C, S, T>,
    receiver: ReceivePipeline<C, S>,
    timeline: Option<Timeline>,
}

impl<E, C, S, T> Messenger<E, C, S, T>
where
    E: Environment,
    C: Cipher,
    S: Storage,
    T: Transport,
{
    /// Build a messenger for `user` with a fresh cache.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `config` does not validate.
    pub fn new(
        env: E,
        user: UserId,
        cipher: Arc<C>,
        storage: Arc<S>,
        transport: Arc<T>,
        materializer: Arc<dyn MediaMaterializer>,
        config: ClientConfig,
    ) -> Result<Self, MessengerError> {
        config.validate()?;

        let cache = Arc::new(DecryptionCache::new(materializer));
        let sender = SendPipeline::new(
            env.clone(),
            Arc::clone(&cache),
            Arc::clone(&cipher),
            Arc::clone(&storage),
            transport,
            config.clone(),
        );
        let receiver = ReceivePipeline::new(Arc::clone(&cache), cipher, storage, config);

        Ok(Self { env, user, cache, sender, receiver, timeline: None })
    }

    /// Signed-in user.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Shared decryption cache.
    pub fn cache(&self) -> &Arc<DecryptionCache> {
        &self.cache
    }

    /// Timeline of the open conversation.
    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    /// Make `conversation` the open one.
    ///
    /// Switching away from another conversation evicts its cache scope and
    /// starts an empty timeline. Opening the active conversation again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotParticipant` if the user is not part of `conversation`.
    pub fn open_conversation(&mut self, conversation: Conversation) -> Result<(), MessengerError> {
        if !conversation.includes(&self.user) {
            return Err(MessengerError::NotParticipant);
        }

        if let Some(current) = &self.timeline {
            if current.conversation().id == conversation.id {
                return Ok(());
            }
            self.cache.clear_conversation(&current.conversation().id);
        }

        tracing::debug!(conversation_id = %conversation.id, "opened conversation");
        self.timeline = Some(Timeline::new(conversation));
        Ok(())
    }

    /// Send a draft in the open conversation.
    ///
    /// The draft appears on the timeline immediately. On failure the entry is
    /// marked failed and keeps the draft for [`Messenger::retry_send`].
    ///
    /// # Errors
    ///
    /// - `NoConversation`: nothing is open
    /// - `Send`: the pipeline failed; the entry is marked failed
    pub async fn send(&mut self, draft: Draft) -> Result<MessageId, MessengerError> {
        let now = self.env.wall_clock_millis();
        let timeline = self.timeline.as_mut().ok_or(MessengerError::NoConversation)?;
        let local_id = timeline.begin_send(draft.clone(), now);

        self.dispatch(local_id, draft).await
    }

    /// Re-send a failed entry with its kept draft.
    ///
    /// # Errors
    ///
    /// - `NoConversation`: nothing is open
    /// - `NothingToRetry`: `local_id` is not a failed send
    /// - `Send`: the pipeline failed again
    pub async fn retry_send(&mut self, local_id: LocalId) -> Result<MessageId, MessengerError> {
        let timeline = self.timeline.as_mut().ok_or(MessengerError::NoConversation)?;
        let draft = timeline.take_retry(local_id).ok_or(MessengerError::NothingToRetry(local_id))?;

        self.dispatch(local_id, draft).await
    }

    /// Add received messages to the open conversation and decrypt them.
    ///
    /// Messages of other conversations and duplicates are ignored. Per-message
    /// failures end up as `Failed` entries.
    ///
    /// # Errors
    ///
    /// - `NoConversation`: nothing is open
    /// - `Key`: the conversation key could not be derived; entries that need
    ///   it are marked failed, legacy entries still decrypt
    pub async fn receive(&mut self, messages: Vec<Message>) -> Result<(), MessengerError> {
        let timeline = self.timeline.as_mut().ok_or(MessengerError::NoConversation)?;
        let conversation_id = timeline.conversation().id.clone();

        for message in messages {
            if message.conversation_id != conversation_id {
                tracing::debug!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    "ignoring message for a conversation that is not open"
                );
                continue;
            }
            timeline.on_received(message);
        }

        let pending = timeline.pending_decrypt();
        self.decrypt(pending).await
    }

    /// Give a `Failed` entry a fresh decryption attempt.
    ///
    /// # Errors
    ///
    /// - `NoConversation`: nothing is open
    /// - `UnknownMessage`: `id` is not a received message on the timeline
    /// - `NothingToDecrypt`: the entry is not in `Failed`
    /// - `Key`: the conversation key could not be derived
    pub async fn retry_decrypt(&mut self, id: &MessageId) -> Result<(), MessengerError> {
        let timeline = self.timeline.as_ref().ok_or(MessengerError::NoConversation)?;
        let entry = timeline.entry(id).ok_or_else(|| MessengerError::UnknownMessage(id.clone()))?;
        let message = entry.message.clone().ok_or_else(|| MessengerError::UnknownMessage(id.clone()))?;
        if !matches!(entry.state, EntryState::Failed(_)) {
            return Err(MessengerError::NothingToDecrypt(id.clone()));
        }

        self.decrypt(vec![message]).await
    }

    /// Retry the failed media slot of a received message.
    ///
    /// # Errors
    ///
    /// - `NoConversation`: nothing is open
    /// - `UnknownMessage`: `id` is not a persisted message on the timeline
    /// - `Key`: the conversation key could not be derived
    pub async fn retry_media(&mut self, id: &MessageId) -> Result<(), MessengerError> {
        let timeline = self.timeline.as_ref().ok_or(MessengerError::NoConversation)?;
        let conversation = timeline.conversation().clone();
        let message = timeline
            .entry(id)
            .and_then(|entry| entry.message.clone())
            .ok_or_else(|| MessengerError::UnknownMessage(id.clone()))?;

        let result = self.receiver.retry_media(&conversation, &message).await;

        let Some(timeline) = self.timeline.as_mut() else {
            return Err(MessengerError::NoConversation);
        };
        match result {
            Ok(decrypted) => {
                timeline.refresh(id, decrypted);
                Ok(())
            },
            Err(ReceiveError::KeyUnavailable(err)) => Err(MessengerError::Key(err)),
            Err(err) => {
                tracing::warn!(message_id = %id, error = %err, "media retry failed");
                Ok(())
            },
        }
    }

    /// Drop every cached key, message and media handle, and close the
    /// conversation.
    pub fn logout(&mut self) {
        self.cache.clear_all();
        self.timeline = None;
        tracing::debug!(user_id = %self.user, "logged out");
    }

    async fn decrypt(&mut self, messages: Vec<Message>) -> Result<(), MessengerError> {
        let timeline = self.timeline.as_mut().ok_or(MessengerError::NoConversation)?;
        let conversation = timeline.conversation().clone();

        let batch: Vec<Message> =
            messages.into_iter().filter(|message| timeline.begin_decrypt(&message.id)).collect();
        if batch.is_empty() {
            return Ok(());
        }

        let DecryptedBatch { mut results, key_error } =
            self.receiver.open_batch(&conversation, &batch).await;

        // A conversation switch cannot happen while `&mut self` is held
        let Some(timeline) = self.timeline.as_mut() else {
            return Err(MessengerError::NoConversation);
        };
        for message in &batch {
            if let Some(result) = results.remove(&message.id) {
                timeline.finish_decrypt(&message.id, result);
            }
        }

        match key_error {
            Some(err) => {
                tracing::warn!(conversation_id = %conversation.id, error = %err, "conversation key unavailable");
                Err(MessengerError::Key(err))
            },
            None => Ok(()),
        }
    }

    async fn dispatch(&mut self, local_id: LocalId, draft: Draft) -> Result<MessageId, MessengerError> {
        let conversation = self
            .timeline
            .as_ref()
            .map(|timeline| timeline.conversation().clone())
            .ok_or(MessengerError::NoConversation)?;

        let result = self.sender.send(&conversation, &self.user, &draft).await;

        let Some(timeline) = self.timeline.as_mut() else {
            return Err(MessengerError::NoConversation);
        };
        match result {
            Ok(sent) => {
                let id = sent.message.id.clone();
                timeline.reconcile(local_id, sent);
                Ok(id)
            },
            Err(error) => {
                timeline.mark_send_failed(local_id, error.clone());
                Err(MessengerError::Send { local_id, error })
            },
        }
    }
}
