//! Instrumented cipher for asserting how often AEAD work runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use hushline_crypto::{AesGcmCipher, Cipher, ConversationKey, CryptoError, NONCE_SIZE};

/// [`AesGcmCipher`] that counts every call.
///
/// `open_text` calls are counted separately from raw `open` calls, so text
/// and media decryptions can be told apart.
#[derive(Default)]
pub struct CountingCipher {
    inner: AesGcmCipher,
    seals: AtomicUsize,
    opens: AtomicUsize,
    text_opens: AtomicUsize,
}

impl CountingCipher {
    /// Fresh cipher with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of seal calls (text and media).
    pub fn seals(&self) -> usize {
        self.seals.load(Ordering::SeqCst)
    }

    /// Number of raw byte opens (media blobs).
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of text opens.
    pub fn text_opens(&self) -> usize {
        self.text_opens.load(Ordering::SeqCst)
    }
}

impl Cipher for CountingCipher {
    fn seal(&self, plaintext: &[u8], key: &ConversationKey, nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
        self.seals.fetch_add(1, Ordering::SeqCst);
        self.inner.seal(plaintext, key, nonce)
    }

    fn open(&self, sealed: &[u8], key: &ConversationKey) -> Result<Vec<u8>, CryptoError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(sealed, key)
    }

    fn open_text(&self, sealed: &[u8], key: &ConversationKey) -> Result<String, CryptoError> {
        self.text_opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open_text(sealed, key)
    }
}
