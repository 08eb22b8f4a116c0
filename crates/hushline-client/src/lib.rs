//! Hushline client
//!
//! Send and receive pipelines for encrypted direct messages, built around a
//! shared [`DecryptionCache`].
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!  Draft ───────► │       SendPipeline       │ ──► Storage::upload
//!                 │                          │ ──► Transport::publish
//!                 └────────────┬─────────────┘
//!                              │ seeds
//!                              ▼
//!                 ┌──────────────────────────┐
//!                 │     DecryptionCache      │  keys · messages · media
//!                 │   (single-flight guards) │
//!                 └────────────▲─────────────┘
//!                              │ reads / fills
//!                 ┌────────────┴─────────────┐
//!  Message ─────► │     ReceivePipeline      │ ──► Storage::fetch
//!                 └──────────────────────────┘
//! ```
//!
//! The cache is an explicit service passed to both pipelines. It is cleared
//! only by its owner (conversation switch, logout), never implicitly.
//!
//! # Runtime
//!
//! Key derivation runs on the tokio blocking pool; pipeline calls must be
//! made from within a tokio runtime.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache;
pub mod collab;
pub mod decrypted;
pub mod error;
pub mod flight;
pub mod media;
pub mod receive;
pub mod send;

pub use cache::{CacheStats, DecryptionCache, MediaKey};
pub use collab::{Storage, Transport};
pub use decrypted::{ContentOrigin, DecryptedMessage, MediaSlot};
pub use error::{KeyError, MediaError, ReceiveError, SendError, StorageError, TransportError};
pub use flight::SingleFlight;
pub use media::{
    FALLBACK_MEDIA_TYPE, InMemoryMaterializer, MediaHandle, MediaMaterializer, TempFileMaterializer,
};
pub use receive::{BatchResult, DecryptedBatch, ReceivePipeline};
pub use send::{Attachment, Draft, SendPipeline, SentMessage, legacy_server_layer};
