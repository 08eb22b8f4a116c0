//! In-memory message transport.

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use hushline_client::{Transport, TransportError};
use hushline_proto::{Message, MessageId, OutgoingMessage};

/// Transport that persists messages in a list and assigns sequential ids.
#[derive(Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    failing_publishes: AtomicUsize,
}

impl MemoryTransport {
    /// Empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every persisted message, in publish order.
    pub fn published(&self) -> Vec<Message> {
        self.lock().clone()
    }

    /// Fail the next `count` publishes with `Unavailable`.
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    async fn publish(&self, message: OutgoingMessage) -> Result<Message, TransportError> {
        let injected = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Unavailable("injected publish failure".to_owned()));
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let persisted = Message {
            id: MessageId::new(format!("msg-{seq}")),
            conversation_id: message.conversation_id,
            content: message.content,
            media_url: message.media_url,
            sender_id: message.sender_id,
            created_at: format!("2024-05-01T00:00:{:02}Z", seq % 60),
        };

        self.lock().push(persisted.clone());
        Ok(persisted)
    }
}
