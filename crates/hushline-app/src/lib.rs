//! Application layer for Hushline
//!
//! Pure timeline state machine plus the async [`Messenger`] that drives the
//! send and receive pipelines on behalf of a UI.
//!
//! # Components
//!
//! - [`Timeline`]: entries of the open conversation, with optimistic echo for
//!   sends and per-message decrypt states for receives
//! - [`Messenger`]: owns the cache and pipelines, switches conversations and
//!   clears cache scope on switch and logout

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod messenger;
mod timeline;

pub use error::MessengerError;
pub use messenger::Messenger;
pub use timeline::{EntryState, LocalId, Timeline, TimelineEntry};
