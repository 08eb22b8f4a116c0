//! Decryption cache with single-flight concurrency control.
//!
//! Memoizes the three expensive results of the receive path:
//!
//! - conversation keys (`conversation_id -> key`)
//! - decrypted messages (`message_id -> text + media slot`)
//! - decrypted media (`(conversation_id, remote_url) -> local handle`)
//!
//! Each identity space has its own [`SingleFlight`] guard, so at most one
//! derivation per conversation, one decryption per message id and one fetch
//! per media key runs at any time, no matter how many render paths ask.
//!
//! # Invariants
//!
//! - Writes are idempotent: the first value stored for an identity wins and
//!   later writers receive the stored value
//! - A message entry never changes conversation
//! - Every media handle in the cache is released exactly once, on eviction
//! - A cached message never points at a released media handle
//! - Entries are only removed by [`DecryptionCache::clear_conversation`] and
//!   [`DecryptionCache::clear_all`]

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use hushline_crypto::{ConversationKey, derive_conversation_key};
use hushline_proto::{Conversation, ConversationId, MessageId, RemoteUrl};

use crate::{
    decrypted::{DecryptedMessage, MediaSlot},
    error::{KeyError, MediaError, ReceiveError},
    flight::SingleFlight,
    media::{MediaHandle, MediaMaterializer},
};

/// Media cache identity: one encrypted source in one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaKey {
    /// Conversation the blob belongs to
    pub conversation_id: ConversationId,
    /// Remote location of the encrypted blob
    pub remote_url: RemoteUrl,
}

impl MediaKey {
    /// Build a media cache key.
    pub fn new(conversation_id: ConversationId, remote_url: RemoteUrl) -> Self {
        Self { conversation_id, remote_url }
    }
}

/// Entry counts, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached messages
    pub messages: usize,
    /// Cached conversation keys
    pub keys: usize,
    /// Cached media handles
    pub media: usize,
}

struct CachedMessage {
    conversation_id: ConversationId,
    message: DecryptedMessage,
}

#[derive(Default)]
struct CacheState {
    messages: HashMap<MessageId, CachedMessage>,
    keys: HashMap<ConversationId, Arc<ConversationKey>>,
    media: HashMap<MediaKey, MediaHandle>,
}

impl CacheState {
    /// `slot`, unless it is a local handle no longer cached for the
    /// conversation.
    fn live_slot(
        &self,
        conversation_id: &ConversationId,
        id: &MessageId,
        slot: MediaSlot,
    ) -> MediaSlot {
        let MediaSlot::Local(handle) = &slot else {
            return slot;
        };

        let live = self
            .media
            .iter()
            .any(|(key, cached)| key.conversation_id == *conversation_id && cached == handle);
        if live {
            slot
        } else {
            tracing::debug!(message_id = %id, uri = %handle.uri, "media handle evicted before store");
            MediaSlot::Failed(MediaError::Evicted)
        }
    }
}

/// Process-local cache of keys, decrypted text and decrypted media.
///
/// Constructed explicitly and shared via `Arc`. Nothing is global.
pub struct DecryptionCache {
    state: Mutex<CacheState>,
    materializer: Arc<dyn MediaMaterializer>,
    key_flights: SingleFlight<ConversationId, Result<Arc<ConversationKey>, KeyError>>,
    message_flights: SingleFlight<MessageId, Result<DecryptedMessage, ReceiveError>>,
    media_flights: SingleFlight<MediaKey, Result<MediaHandle, MediaError>>,
}

impl DecryptionCache {
    /// Create an empty cache releasing media through `materializer`.
    pub fn new(materializer: Arc<dyn MediaMaterializer>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            materializer,
            key_flights: SingleFlight::new(),
            message_flights: SingleFlight::new(),
            media_flights: SingleFlight::new(),
        }
    }

    /// Materializer that owns this cache's media handles.
    pub fn materializer(&self) -> &Arc<dyn MediaMaterializer> {
        &self.materializer
    }

    /// Cached message, if any.
    pub fn get_message(&self, id: &MessageId) -> Option<DecryptedMessage> {
        self.lock().messages.get(id).map(|entry| entry.message.clone())
    }

    /// Store a decrypted message.
    ///
    /// Returns `false` if an entry already existed; the existing entry is
    /// kept. A local media slot whose handle was evicted in the meantime is
    /// stored as [`MediaError::Evicted`].
    pub fn set_message(
        &self,
        conversation_id: ConversationId,
        id: MessageId,
        mut message: DecryptedMessage,
    ) -> bool {
        let mut state = self.lock();

        if let Some(existing) = state.messages.get(&id) {
            if existing.conversation_id != conversation_id {
                tracing::warn!(
                    message_id = %id,
                    cached = %existing.conversation_id,
                    attempted = %conversation_id,
                    "ignoring cache write for message from a different conversation"
                );
            }
            return false;
        }

        message.media = state.live_slot(&conversation_id, &id, message.media);
        state.messages.insert(id, CachedMessage { conversation_id, message });
        true
    }

    /// Replace the media slot of a cached message.
    ///
    /// Returns the updated message, or `None` if the message is not cached.
    pub fn update_media(&self, id: &MessageId, media: MediaSlot) -> Option<DecryptedMessage> {
        let mut state = self.lock();
        let conversation_id = state.messages.get(id)?.conversation_id.clone();
        let media = state.live_slot(&conversation_id, id, media);

        let entry = state.messages.get_mut(id)?;
        entry.message.media = media;
        Some(entry.message.clone())
    }

    /// Cached conversation key, if any.
    pub fn get_key(&self, conversation_id: &ConversationId) -> Option<Arc<ConversationKey>> {
        self.lock().keys.get(conversation_id).cloned()
    }

    /// Store a conversation key.
    ///
    /// Returns the canonical instance: the existing one if present.
    pub fn set_key(
        &self,
        conversation_id: ConversationId,
        key: ConversationKey,
    ) -> Arc<ConversationKey> {
        Arc::clone(self.lock().keys.entry(conversation_id).or_insert_with(|| Arc::new(key)))
    }

    /// Cached media handle, if any.
    pub fn get_media(&self, key: &MediaKey) -> Option<MediaHandle> {
        self.lock().media.get(key).cloned()
    }

    /// Store a media handle.
    ///
    /// Returns the canonical handle. If one already existed for `key`, the
    /// new handle is released so each source maps to exactly one resource.
    pub fn set_media(&self, key: MediaKey, handle: MediaHandle) -> MediaHandle {
        let existing = {
            let mut state = self.lock();
            match state.media.get(&key) {
                Some(existing) => Some(existing.clone()),
                None => {
                    state.media.insert(key, handle.clone());
                    None
                },
            }
        };

        match existing {
            Some(existing) => {
                self.materializer.release(&handle);
                existing
            },
            None => handle,
        }
    }

    /// Evict the key and every message and media entry of a conversation.
    ///
    /// Media handles are released. Operations already in flight are not
    /// cancelled; their results land in fresh entries.
    pub fn clear_conversation(&self, conversation_id: &ConversationId) {
        let released: Vec<MediaHandle> = {
            let mut state = self.lock();
            state.keys.remove(conversation_id);
            state.messages.retain(|_, entry| entry.conversation_id != *conversation_id);

            let keys: Vec<MediaKey> = state
                .media
                .keys()
                .filter(|key| key.conversation_id == *conversation_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| state.media.remove(key)).collect()
        };

        for handle in &released {
            self.materializer.release(handle);
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            released_media = released.len(),
            "cleared conversation cache"
        );
    }

    /// Evict everything and release every media handle.
    pub fn clear_all(&self) {
        let state = std::mem::take(&mut *self.lock());

        for handle in state.media.values() {
            self.materializer.release(handle);
        }

        tracing::debug!(
            messages = state.messages.len(),
            keys = state.keys.len(),
            media = state.media.len(),
            "cleared decryption cache"
        );
    }

    /// Current entry counts.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats { messages: state.messages.len(), keys: state.keys.len(), media: state.media.len() }
    }

    /// Check if a decryption for `id` is currently running.
    pub fn is_decrypting(&self, id: &MessageId) -> bool {
        self.message_flights.is_in_flight(id)
    }

    /// Cached conversation key, or derive it.
    ///
    /// Derivation (PBKDF2, CPU-bound) runs on the tokio blocking pool.
    /// Concurrent callers for one conversation share a single derivation.
    ///
    /// # Panics
    ///
    /// Must be called within a tokio runtime.
    pub async fn key_or_derive(
        self: &Arc<Self>,
        conversation: &Conversation,
    ) -> Result<Arc<ConversationKey>, KeyError> {
        let id = conversation.id.clone();
        let weak = Arc::downgrade(self);
        let conversation = conversation.clone();

        self.key_flights
            .run(
                id.clone(),
                || self.get_key(&id).map(Ok),
                move || async move {
                    let key = derive_on_blocking_pool(conversation.clone()).await?;
                    tracing::debug!(conversation_id = %conversation.id, "derived conversation key");

                    Ok(match weak.upgrade() {
                        Some(cache) => cache.set_key(conversation.id, key),
                        None => Arc::new(key),
                    })
                },
            )
            .await
    }

    /// Cached message, or run `decrypt` once for all concurrent callers.
    ///
    /// A successful result is cached before any caller observes it. Failures
    /// are shared with the callers of that attempt but not cached.
    pub async fn message_or_resolve<F, Fut>(
        self: &Arc<Self>,
        conversation_id: &ConversationId,
        id: &MessageId,
        decrypt: F,
    ) -> Result<DecryptedMessage, ReceiveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DecryptedMessage, ReceiveError>> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let conversation_id = conversation_id.clone();
        let entry_id = id.clone();

        self.message_flights
            .run(
                id.clone(),
                || self.get_message(id).map(Ok),
                move || {
                    let work = decrypt();
                    async move {
                        let message = work.await?;
                        let Some(cache) = weak.upgrade() else {
                            return Ok(message);
                        };

                        // An earlier writer wins; hand out its entry
                        cache.set_message(conversation_id, entry_id.clone(), message.clone());
                        Ok(cache.get_message(&entry_id).unwrap_or(message))
                    }
                },
            )
            .await
    }

    /// Cached media handle, or run `decrypt` once and materialize its bytes.
    pub async fn media_or_resolve<F, Fut>(
        self: &Arc<Self>,
        key: &MediaKey,
        media_type: &str,
        decrypt: F,
    ) -> Result<MediaHandle, MediaError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, MediaError>> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let entry_key = key.clone();
        let media_type = media_type.to_owned();

        self.media_flights
            .run(
                key.clone(),
                || self.get_media(key).map(Ok),
                move || {
                    let work = decrypt();
                    async move {
                        let bytes = work.await?;
                        let Some(cache) = weak.upgrade() else {
                            return Err(MediaError::Materialize("cache dropped".to_owned()));
                        };

                        let handle = cache.materializer.materialize(bytes, &media_type)?;
                        Ok(cache.set_media(entry_key, handle))
                    }
                },
            )
            .await
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn derive_on_blocking_pool(conversation: Conversation) -> Result<ConversationKey, KeyError> {
    let derived = tokio::task::spawn_blocking(move || {
        derive_conversation_key(
            conversation.id.as_str(),
            conversation.participant_a.as_str(),
            conversation.participant_b.as_str(),
        )
    })
    .await
    .map_err(|e| KeyError::Interrupted(e.to_string()))?;

    Ok(derived?)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hushline_proto::UserId;

    use super::*;
    use crate::{decrypted::ContentOrigin, media::InMemoryMaterializer};

    fn setup() -> (Arc<InMemoryMaterializer>, Arc<DecryptionCache>) {
        let materializer = Arc::new(InMemoryMaterializer::new());
        let cache = Arc::new(DecryptionCache::new(materializer.clone()));
        (materializer, cache)
    }

    fn conversation(id: &str) -> Conversation {
        Conversation::new(
            ConversationId::new(id),
            UserId::new("11111111-1111-1111-1111-111111111111"),
            UserId::new("22222222-2222-2222-2222-222222222222"),
        )
    }

    fn text(plaintext: &str) -> DecryptedMessage {
        DecryptedMessage {
            plaintext: plaintext.to_owned(),
            origin: ContentOrigin::Encrypted,
            media: MediaSlot::None,
        }
    }

    #[test]
    fn first_message_write_wins() {
        let (_, cache) = setup();
        let conv = ConversationId::new("conv-1");
        let id = MessageId::new("m1");

        assert!(cache.set_message(conv.clone(), id.clone(), text("first")));
        assert!(!cache.set_message(conv, id.clone(), text("second")));
        assert_eq!(cache.get_message(&id).unwrap().plaintext, "first");
    }

    #[test]
    fn message_never_moves_between_conversations() {
        let (_, cache) = setup();
        let id = MessageId::new("m1");

        cache.set_message(ConversationId::new("conv-1"), id.clone(), text("mine"));
        cache.set_message(ConversationId::new("conv-2"), id.clone(), text("theirs"));
        cache.clear_conversation(&ConversationId::new("conv-2"));

        assert_eq!(cache.get_message(&id).unwrap().plaintext, "mine");
    }

    #[test]
    fn update_media_replaces_slot() {
        let (_, cache) = setup();
        let id = MessageId::new("m1");
        cache.set_message(ConversationId::new("conv-1"), id.clone(), text("hi"));

        let failed = MediaSlot::Failed(MediaError::Missing);
        let updated = cache.update_media(&id, failed.clone()).unwrap();

        assert_eq!(updated.media, failed);
        assert!(cache.update_media(&MessageId::new("unknown"), MediaSlot::None).is_none());
    }

    #[test]
    fn message_with_evicted_media_is_downgraded() {
        let (materializer, cache) = setup();
        let conv = ConversationId::new("conv-1");
        let key = MediaKey::new(conv.clone(), RemoteUrl::new("https://blob/1"));
        let handle = cache.set_media(key, materializer.materialize(vec![3; 4], "image/png").unwrap());

        // Clear lands between the media write and the message write
        cache.clear_conversation(&conv);
        let message = DecryptedMessage { media: MediaSlot::Local(handle.clone()), ..text("pic") };
        cache.set_message(conv.clone(), MessageId::new("m1"), message);

        let stored = cache.get_message(&MessageId::new("m1")).unwrap();
        assert_eq!(stored.media, MediaSlot::Failed(MediaError::Evicted));
        assert!(materializer.read(&handle).is_none());

        // Retry path stores a live handle as is
        let key = MediaKey::new(conv, RemoteUrl::new("https://blob/1"));
        let fresh = cache.set_media(key, materializer.materialize(vec![3; 4], "image/png").unwrap());
        let updated = cache.update_media(&MessageId::new("m1"), MediaSlot::Local(fresh.clone())).unwrap();
        assert_eq!(updated.media, MediaSlot::Local(fresh));
        let stale = cache.update_media(&MessageId::new("m1"), MediaSlot::Local(handle)).unwrap();
        assert_eq!(stale.media, MediaSlot::Failed(MediaError::Evicted));
    }

    #[test]
    fn duplicate_media_handle_is_released() {
        let (materializer, cache) = setup();
        let key = MediaKey::new(ConversationId::new("conv-1"), RemoteUrl::new("https://blob/1"));

        let first = materializer.materialize(vec![1], "image/png").unwrap();
        let second = materializer.materialize(vec![1], "image/png").unwrap();

        assert_eq!(cache.set_media(key.clone(), first.clone()), first);
        assert_eq!(cache.set_media(key, second.clone()), first);
        assert_eq!(materializer.live_count(), 1);
        assert!(materializer.read(&second).is_none());
    }

    #[test]
    fn clear_conversation_is_scoped() {
        let (materializer, cache) = setup();
        let one = ConversationId::new("conv-1");
        let two = ConversationId::new("conv-2");

        for conv in [&one, &two] {
            let handle = materializer.materialize(vec![0; 4], "image/png").unwrap();
            cache.set_media(MediaKey::new(conv.clone(), RemoteUrl::new("https://blob/x")), handle);
            cache.set_message(conv.clone(), MessageId::new(format!("{conv}-m")), text("hi"));
            cache.set_key(conv.clone(), ConversationKey::from_bytes([7; 32]));
        }

        cache.clear_conversation(&one);

        assert_eq!(cache.stats(), CacheStats { messages: 1, keys: 1, media: 1 });
        assert_eq!(materializer.live_count(), 1);
        assert!(cache.get_key(&one).is_none());
        assert!(cache.get_key(&two).is_some());
    }

    #[test]
    fn clear_all_releases_everything() {
        let (materializer, cache) = setup();
        let handle = materializer.materialize(vec![0; 4], "image/png").unwrap();
        cache.set_media(
            MediaKey::new(ConversationId::new("conv-1"), RemoteUrl::new("https://blob/1")),
            handle,
        );

        cache.clear_all();

        assert_eq!(cache.stats(), CacheStats::default());
        assert_eq!(materializer.live_count(), 0);
    }

    #[test]
    fn set_key_keeps_first_instance() {
        let (_, cache) = setup();
        let conv = ConversationId::new("conv-1");

        let first = cache.set_key(conv.clone(), ConversationKey::from_bytes([1; 32]));
        let second = cache.set_key(conv, ConversationKey::from_bytes([2; 32]));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.as_bytes(), &[1; 32]);
    }

    #[tokio::test]
    async fn concurrent_key_requests_share_one_derivation() {
        let (_, cache) = setup();
        let conv = conversation("conv-1");

        let (a, b) = tokio::join!(cache.key_or_derive(&conv), cache.key_or_derive(&conv));
        let a = a.unwrap();
        let b = b.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().keys, 1);

        let again = cache.key_or_derive(&conv).await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[tokio::test]
    async fn blank_participant_is_a_key_error() {
        let (_, cache) = setup();
        let conv = Conversation::new(ConversationId::new("conv-1"), UserId::new(""), UserId::new("b"));

        let err = cache.key_or_derive(&conv).await.unwrap_err();

        assert!(matches!(err, KeyError::Derivation(_)));
        assert_eq!(cache.stats().keys, 0);
    }

    #[tokio::test]
    async fn failed_decryption_is_not_cached() {
        let (_, cache) = setup();
        let conv = ConversationId::new("conv-1");
        let id = MessageId::new("m1");
        let attempts = Arc::new(AtomicUsize::new(0));

        let attempt = |ok: bool| {
            let attempts = Arc::clone(&attempts);
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                if ok {
                    Ok(text("hello"))
                } else {
                    Err(ReceiveError::Decrypt(hushline_crypto::CryptoError::Authentication))
                }
            }
        };

        let failed = cache.message_or_resolve(&conv, &id, attempt(false)).await;
        assert!(failed.is_err());
        assert!(cache.get_message(&id).is_none());

        let ok = cache.message_or_resolve(&conv, &id, attempt(true)).await.unwrap();
        let hit = cache.message_or_resolve(&conv, &id, attempt(true)).await.unwrap();

        assert_eq!(ok, hit);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn media_is_materialized_once() {
        let (materializer, cache) = setup();
        let key = MediaKey::new(ConversationId::new("conv-1"), RemoteUrl::new("https://blob/1"));

        let (a, b) = tokio::join!(
            cache.media_or_resolve(&key, "image/png", || async { Ok(vec![9; 16]) }),
            cache.media_or_resolve(&key, "image/png", || async { Ok(vec![8; 16]) }),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(materializer.live_count(), 1);
    }
}
