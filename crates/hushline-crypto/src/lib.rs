//! Hushline Cryptographic Primitives
//!
//! Cryptographic building blocks for direct-message encryption. Pure functions
//! with deterministic outputs. Callers provide the random IV bytes so tests can
//! run with a seeded environment.
//!
//! # Key Lifecycle
//!
//! Every direct-message conversation has exactly one symmetric key. Both
//! participants derive it independently from identifiers they already know;
//! nothing is exchanged and nothing is persisted.
//!
//! ```text
//! conversation_id + sorted(participant_a, participant_b)
//!        │
//!        ▼
//! PBKDF2-HMAC-SHA256 (100k rounds, salt = conversation_id cycled to 16 bytes)
//!        │
//!        ▼
//! ConversationKey (256 bit, memory only)
//!        │
//!        ▼
//! AES-256-GCM → IV ‖ ciphertext ‖ tag
//! ```
//!
//! # Security
//!
//! Authenticity:
//! - AES-256-GCM provides tamper-proof encryption
//! - Failed authentication tag -> reject, never partial plaintext
//!
//! Trust boundary:
//! - The key is a deterministic function of public identifiers. Anyone able to
//!   read the conversation and participant ids (the backend included) can
//!   reconstruct it. Confidentiality therefore rests on those ids staying
//!   private to the transport. There is no key exchange and no forward
//!   secrecy.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod key;

pub use aead::{
    AesGcmCipher, Cipher, NONCE_SIZE, TAG_SIZE, decrypt, decrypt_text, encrypt, encrypt_text,
};
pub use error::CryptoError;
pub use kdf::{KDF_ITERATIONS, SALT_LEN, derive_conversation_key};
pub use key::{ConversationKey, KEY_LEN};
