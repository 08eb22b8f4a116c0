//! Hushline protocol types
//!
//! Records exchanged with the backend and the versioned envelope that
//! distinguishes encrypted message content from legacy plaintext.
//!
//! # Wire Format
//!
//! A message's `content` field is one of:
//!
//! - Legacy plaintext: any string that is not an envelope. Pre-encryption
//!   messages stay readable forever.
//! - Envelope: UTF-8 JSON
//!   `{"encrypted":true,"version":1,"ciphertext":"<base64>", ...}` where the
//!   ciphertext is `base64(IV ‖ AES-GCM ciphertext ‖ tag)`.
//!
//! Media blobs never travel in the envelope. The envelope only records that
//! the blob behind `media_url` is encrypted and what type it had.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod error;
pub mod ids;
pub mod message;

pub use envelope::{
    ENVELOPE_VERSION, EncryptedPayload, MessageContent, classify, decode, encode, is_encrypted,
};
pub use error::DecodeError;
pub use ids::{ConversationId, MessageId, RemoteUrl, UserId};
pub use message::{Conversation, Message, OutgoingMessage};
