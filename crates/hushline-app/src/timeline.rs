//! Conversation timeline state machine.
//!
//! Pure state: no I/O, no async. [`crate::Messenger`] drives it from
//! pipeline results; tests drive it directly.
//!
//! # Entry States
//!
//! ```text
//! outgoing:  Sending ──► Decrypted            (reconcile)
//!               │  ▲
//!               ▼  │ take_retry
//!            SendFailed
//!
//! incoming:  Idle ──► Decrypting ──► Decrypted
//!                         │
//!                         ▼
//!                       Failed ──► Decrypting (fresh attempt)
//! ```

use std::fmt;

use hushline_client::{DecryptedMessage, Draft, ReceiveError, SendError, SentMessage};
use hushline_proto::{Conversation, Message, MessageId};

/// Id of an optimistic entry, assigned before the backend knows the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Display state of one timeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Optimistic echo while the send pipeline runs
    Sending {
        /// What the user typed, shown immediately
        draft: Draft,
    },
    /// Send failed. The draft is kept for a user-driven retry.
    SendFailed {
        /// What the user typed
        draft: Draft,
        /// Why the send failed
        error: SendError,
    },
    /// Received, not yet decrypted
    Idle,
    /// Decryption running
    Decrypting,
    /// Ready to display
    Decrypted(DecryptedMessage),
    /// Decryption failed; shows a "failed to decrypt" affordance
    Failed(ReceiveError),
}

/// One row of the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Set for entries created by a local send
    pub local_id: Option<LocalId>,
    /// Persisted record, once the backend has one
    pub message: Option<Message>,
    /// Display state
    pub state: EntryState,
    /// Wall clock of an optimistic send, in Unix millis
    pub sent_at_millis: Option<u64>,
}

impl TimelineEntry {
    /// Backend id, if persisted.
    pub fn message_id(&self) -> Option<&MessageId> {
        self.message.as_ref().map(|message| &message.id)
    }

    /// Text to render, if any is known yet.
    pub fn text(&self) -> Option<&str> {
        match &self.state {
            EntryState::Sending { draft } | EntryState::SendFailed { draft, .. } => Some(&draft.text),
            EntryState::Decrypted(decrypted) => Some(&decrypted.plaintext),
            EntryState::Idle | EntryState::Decrypting | EntryState::Failed(_) => None,
        }
    }
}

/// Entries of the open conversation in receive/send order.
#[derive(Debug, Clone)]
pub struct Timeline {
    conversation: Conversation,
    entries: Vec<TimelineEntry>,
    next_local_id: u64,
}

impl Timeline {
    /// Empty timeline for `conversation`.
    pub fn new(conversation: Conversation) -> Self {
        Self { conversation, entries: Vec::new(), next_local_id: 0 }
    }

    /// Conversation this timeline shows.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Entries in display order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the timeline has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a persisted message.
    pub fn entry(&self, id: &MessageId) -> Option<&TimelineEntry> {
        self.entries.iter().find(|entry| entry.message_id() == Some(id))
    }

    /// Entry for an optimistic send.
    pub fn local_entry(&self, local_id: LocalId) -> Option<&TimelineEntry> {
        self.entries.iter().find(|entry| entry.local_id == Some(local_id))
    }

    /// Append an optimistic entry for `draft`.
    pub fn begin_send(&mut self, draft: Draft, now_millis: u64) -> LocalId {
        let local_id = LocalId(self.next_local_id);
        self.next_local_id += 1;

        self.entries.push(TimelineEntry {
            local_id: Some(local_id),
            message: None,
            state: EntryState::Sending { draft },
            sent_at_millis: Some(now_millis),
        });
        local_id
    }

    /// Replace an optimistic entry with its persisted record.
    ///
    /// If the broadcast of the same message arrived first, the optimistic
    /// entry is dropped and the received one takes the known plaintext.
    /// Returns `false` if `local_id` is not sending.
    pub fn reconcile(&mut self, local_id: LocalId, sent: SentMessage) -> bool {
        let Some(index) = self.local_index(local_id) else {
            return false;
        };
        if !matches!(self.entries[index].state, EntryState::Sending { .. }) {
            return false;
        }

        if let Some(echoed) = self.remote_index(&sent.message.id) {
            self.entries[echoed].state = EntryState::Decrypted(sent.display);
            self.entries.remove(index);
            return true;
        }

        let entry = &mut self.entries[index];
        entry.message = Some(sent.message);
        entry.state = EntryState::Decrypted(sent.display);
        true
    }

    /// Mark an optimistic entry failed, keeping its draft.
    ///
    /// Returns `false` if `local_id` is not sending.
    pub fn mark_send_failed(&mut self, local_id: LocalId, error: SendError) -> bool {
        let Some(entry) = self.local_entry_mut(local_id) else {
            return false;
        };

        match std::mem::replace(&mut entry.state, EntryState::Idle) {
            EntryState::Sending { draft } => {
                entry.state = EntryState::SendFailed { draft, error };
                true
            },
            other => {
                entry.state = other;
                false
            },
        }
    }

    /// Move a failed send back to sending and return its draft.
    pub fn take_retry(&mut self, local_id: LocalId) -> Option<Draft> {
        let entry = self.local_entry_mut(local_id)?;

        match std::mem::replace(&mut entry.state, EntryState::Idle) {
            EntryState::SendFailed { draft, .. } => {
                entry.state = EntryState::Sending { draft: draft.clone() };
                Some(draft)
            },
            other => {
                entry.state = other;
                None
            },
        }
    }

    /// Append a received message in `Idle`.
    ///
    /// Messages of other conversations and ids already on the timeline are
    /// ignored. Returns `true` if an entry was added.
    pub fn on_received(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation.id || self.remote_index(&message.id).is_some()
        {
            return false;
        }

        self.entries.push(TimelineEntry {
            local_id: None,
            message: Some(message),
            state: EntryState::Idle,
            sent_at_millis: None,
        });
        true
    }

    /// Start a decryption attempt.
    ///
    /// Allowed from `Idle` and from `Failed` (a fresh attempt). Returns
    /// `false` otherwise, so a message already decrypting or decrypted is not
    /// dispatched twice.
    pub fn begin_decrypt(&mut self, id: &MessageId) -> bool {
        let Some(entry) = self.remote_entry_mut(id) else {
            return false;
        };

        if matches!(entry.state, EntryState::Idle | EntryState::Failed(_)) {
            entry.state = EntryState::Decrypting;
            true
        } else {
            false
        }
    }

    /// Finish a decryption attempt.
    ///
    /// Returns `false` if `id` is not decrypting.
    pub fn finish_decrypt(
        &mut self,
        id: &MessageId,
        result: Result<DecryptedMessage, ReceiveError>,
    ) -> bool {
        let Some(entry) = self.remote_entry_mut(id) else {
            return false;
        };
        if entry.state != EntryState::Decrypting {
            return false;
        }

        entry.state = match result {
            Ok(decrypted) => EntryState::Decrypted(decrypted),
            Err(error) => EntryState::Failed(error),
        };
        true
    }

    /// Replace the display of an already decrypted message.
    ///
    /// Used after a media retry. Returns `false` if `id` is not decrypted.
    pub fn refresh(&mut self, id: &MessageId, decrypted: DecryptedMessage) -> bool {
        match self.remote_entry_mut(id) {
            Some(entry) if matches!(entry.state, EntryState::Decrypted(_)) => {
                entry.state = EntryState::Decrypted(decrypted);
                true
            },
            _ => false,
        }
    }

    /// Received messages still waiting for a first decryption attempt.
    pub fn pending_decrypt(&self) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Idle)
            .filter_map(|entry| entry.message.clone())
            .collect()
    }

    fn local_index(&self, local_id: LocalId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.local_id == Some(local_id))
    }

    fn remote_index(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.message_id() == Some(id))
    }

    fn local_entry_mut(&mut self, local_id: LocalId) -> Option<&mut TimelineEntry> {
        self.entries.iter_mut().find(|entry| entry.local_id == Some(local_id))
    }

    fn remote_entry_mut(&mut self, id: &MessageId) -> Option<&mut TimelineEntry> {
        self.entries.iter_mut().find(|entry| entry.message_id() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use hushline_client::{ContentOrigin, MediaSlot, StorageError};
    use hushline_crypto::CryptoError;
    use hushline_proto::{ConversationId, UserId};
    use proptest::prelude::*;

    use super::*;

    fn timeline() -> Timeline {
        Timeline::new(Conversation::new("conv-1", "alice", "bob"))
    }

    fn message(id: &str) -> Message {
        Message {
            id: MessageId::new(id),
            conversation_id: ConversationId::new("conv-1"),
            content: "{}".to_owned(),
            media_url: None,
            sender_id: UserId::new("bob"),
            created_at: "2024-05-01T10:00:00Z".to_owned(),
        }
    }

    fn decrypted(text: &str) -> DecryptedMessage {
        DecryptedMessage {
            plaintext: text.to_owned(),
            origin: ContentOrigin::Encrypted,
            media: MediaSlot::None,
        }
    }

    fn sent(id: &str, text: &str) -> SentMessage {
        SentMessage { message: message(id), display: decrypted(text) }
    }

    fn upload_failed() -> SendError {
        SendError::Upload(StorageError::Unavailable("offline".into()))
    }

    #[test]
    fn optimistic_echo_shows_text_immediately() {
        let mut timeline = timeline();

        let local = timeline.begin_send(Draft::text("hi"), 1000);

        let entry = timeline.local_entry(local).unwrap();
        assert_eq!(entry.text(), Some("hi"));
        assert_eq!(entry.sent_at_millis, Some(1000));
        assert!(entry.message.is_none());
    }

    #[test]
    fn reconcile_replaces_optimistic_entry() {
        let mut timeline = timeline();
        let local = timeline.begin_send(Draft::text("hi"), 0);

        assert!(timeline.reconcile(local, sent("m1", "hi")));

        assert_eq!(timeline.len(), 1);
        let entry = timeline.entry(&MessageId::new("m1")).unwrap();
        assert_eq!(entry.local_id, Some(local));
        assert_eq!(entry.state, EntryState::Decrypted(decrypted("hi")));
    }

    #[test]
    fn reconcile_after_broadcast_keeps_one_entry() {
        let mut timeline = timeline();
        let local = timeline.begin_send(Draft::text("hi"), 0);
        timeline.on_received(message("m1"));

        assert!(timeline.reconcile(local, sent("m1", "hi")));

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.entries()[0].text(), Some("hi"));
        assert!(timeline.local_entry(local).is_none());
    }

    #[test]
    fn failed_send_keeps_draft_for_retry() {
        let mut timeline = timeline();
        let draft = Draft::text("typed").with_attachment(vec![1, 2], "image/png");
        let local = timeline.begin_send(draft.clone(), 0);

        assert!(timeline.mark_send_failed(local, upload_failed()));
        assert_eq!(timeline.local_entry(local).unwrap().text(), Some("typed"));

        assert_eq!(timeline.take_retry(local), Some(draft));
        assert!(matches!(timeline.local_entry(local).unwrap().state, EntryState::Sending { .. }));
        assert_eq!(timeline.take_retry(local), None);
    }

    #[test]
    fn mark_failed_requires_sending() {
        let mut timeline = timeline();
        let local = timeline.begin_send(Draft::text("hi"), 0);
        timeline.reconcile(local, sent("m1", "hi"));

        assert!(!timeline.mark_send_failed(local, upload_failed()));
        assert!(matches!(timeline.entries()[0].state, EntryState::Decrypted(_)));
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let mut timeline = timeline();

        assert!(timeline.on_received(message("m1")));
        assert!(!timeline.on_received(message("m1")));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn foreign_conversation_is_ignored() {
        let mut timeline = timeline();
        let mut foreign = message("m1");
        foreign.conversation_id = ConversationId::new("conv-2");

        assert!(!timeline.on_received(foreign));
        assert!(timeline.is_empty());
    }

    #[test]
    fn decrypt_state_machine() {
        let mut timeline = timeline();
        let id = MessageId::new("m1");
        timeline.on_received(message("m1"));

        assert!(timeline.begin_decrypt(&id));
        assert!(!timeline.begin_decrypt(&id));

        let failure = ReceiveError::Decrypt(CryptoError::Authentication);
        assert!(timeline.finish_decrypt(&id, Err(failure.clone())));
        assert_eq!(timeline.entry(&id).unwrap().state, EntryState::Failed(failure));

        // A failed attempt may be repeated
        assert!(timeline.begin_decrypt(&id));
        assert!(timeline.finish_decrypt(&id, Ok(decrypted("hello"))));
        assert_eq!(timeline.entry(&id).unwrap().text(), Some("hello"));

        assert!(!timeline.begin_decrypt(&id));
        assert!(!timeline.finish_decrypt(&id, Ok(decrypted("other"))));
    }

    #[test]
    fn pending_decrypt_lists_idle_only() {
        let mut timeline = timeline();
        timeline.on_received(message("m1"));
        timeline.on_received(message("m2"));
        timeline.begin_decrypt(&MessageId::new("m1"));

        let pending: Vec<MessageId> = timeline.pending_decrypt().into_iter().map(|m| m.id).collect();

        assert_eq!(pending, vec![MessageId::new("m2")]);
    }

    proptest! {
        #[test]
        fn prop_message_ids_stay_unique(ids in prop::collection::vec(0u8..8, 0..40)) {
            let mut timeline = timeline();
            for id in &ids {
                timeline.on_received(message(&format!("m{id}")));
            }

            let mut seen: Vec<&MessageId> =
                timeline.entries().iter().filter_map(TimelineEntry::message_id).collect();
            let total = seen.len();
            seen.sort();
            seen.dedup();

            prop_assert_eq!(seen.len(), total);
        }

        #[test]
        fn prop_local_ids_are_unique(count in 0usize..30) {
            let mut timeline = timeline();
            let mut ids: Vec<LocalId> =
                (0..count).map(|_| timeline.begin_send(Draft::text("x"), 0)).collect();
            ids.sort();
            ids.dedup();

            prop_assert_eq!(ids.len(), count);
        }
    }
}
