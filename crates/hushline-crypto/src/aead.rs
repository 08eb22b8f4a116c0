//! Authenticated encryption using AES-256-GCM
//!
//! Sealed wire format, used identically for message text and media blobs:
//!
//! ```text
//! [ IV (12 bytes) | ciphertext | tag (16 bytes) ]
//! ```
//!
//! All functions are pure - the IV must be provided by the caller.

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce, Tag,
    aead::AeadInPlace,
};

use crate::{error::CryptoError, key::ConversationKey};

/// Size of the AES-GCM IV prepended to every sealed blob (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypt bytes with AES-256-GCM.
///
/// Returns `IV ‖ ciphertext ‖ tag`.
///
/// # Security
///
/// - Caller MUST provide a fresh random IV for every call in production. IV
///   reuse under one key breaks GCM confidentiality and authenticity.
pub fn encrypt(plaintext: &[u8], key: &ConversationKey, nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut sealed = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(plaintext);

    let Ok(tag) =
        cipher.encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut sealed[NONCE_SIZE..])
    else {
        unreachable!("AES-256-GCM encryption cannot fail below the 64 GiB message limit");
    };

    sealed.extend_from_slice(&tag);
    sealed
}

/// Decrypt a sealed blob produced by [`encrypt`].
///
/// The tag is verified before any plaintext is produced, so a failure never
/// yields partially decrypted output.
///
/// # Errors
///
/// - `Authentication`: wrong key, tampered bytes, or input shorter than IV +
///   tag
pub fn decrypt(sealed: &[u8], key: &ConversationKey) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Authentication);
    }

    let (nonce, rest) = sealed.split_at(NONCE_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let mut buffer = ciphertext.to_vec();

    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer, Tag::from_slice(tag))
        .map_err(|_| CryptoError::Authentication)?;

    Ok(buffer)
}

/// Encrypt UTF-8 text. See [`encrypt`].
pub fn encrypt_text(text: &str, key: &ConversationKey, nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
    encrypt(text.as_bytes(), key, nonce)
}

/// Decrypt a sealed blob into UTF-8 text.
///
/// # Errors
///
/// - `Authentication`: see [`decrypt`]
/// - `InvalidUtf8`: authentic bytes that are not UTF-8
pub fn decrypt_text(sealed: &[u8], key: &ConversationKey) -> Result<String, CryptoError> {
    let bytes = decrypt(sealed, key)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
}

/// AEAD seam used by the send and receive pipelines.
///
/// Production code uses [`AesGcmCipher`]. Tests wrap it to count calls.
pub trait Cipher: Send + Sync + 'static {
    /// Seal bytes under `key` with the given IV. See [`encrypt`].
    fn seal(&self, plaintext: &[u8], key: &ConversationKey, nonce: [u8; NONCE_SIZE]) -> Vec<u8>;

    /// Open a sealed blob. See [`decrypt`].
    fn open(&self, sealed: &[u8], key: &ConversationKey) -> Result<Vec<u8>, CryptoError>;

    /// Seal UTF-8 text.
    fn seal_text(&self, text: &str, key: &ConversationKey, nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
        self.seal(text.as_bytes(), key, nonce)
    }

    /// Open a sealed blob into UTF-8 text.
    fn open_text(&self, sealed: &[u8], key: &ConversationKey) -> Result<String, CryptoError> {
        let bytes = self.open(sealed, key)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
    }
}

/// AES-256-GCM implementation of [`Cipher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl Cipher for AesGcmCipher {
    fn seal(&self, plaintext: &[u8], key: &ConversationKey, nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
        encrypt(plaintext, key, nonce)
    }

    fn open(&self, sealed: &[u8], key: &ConversationKey) -> Result<Vec<u8>, CryptoError> {
        decrypt(sealed, key)
    }
}
