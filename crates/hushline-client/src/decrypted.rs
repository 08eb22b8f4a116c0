//! Display-ready results of the receive pipeline.

use hushline_proto::RemoteUrl;

use crate::{error::MediaError, media::MediaHandle};

/// Where the displayed text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrigin {
    /// Decrypted from a v1 envelope
    Encrypted,
    /// Pre-encryption plaintext, shown verbatim
    Legacy,
    /// Envelope that could not be decoded, shown verbatim
    Undecodable,
}

/// State of a message's attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSlot {
    /// No attachment
    None,
    /// Unencrypted attachment, rendered straight from its remote location
    Remote(RemoteUrl),
    /// Decrypted attachment behind a local handle
    Local(MediaHandle),
    /// Attachment could not be resolved. Text still renders.
    Failed(MediaError),
}

impl MediaSlot {
    /// Check if the slot shows a failure affordance.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Message content ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// Text to display
    pub plaintext: String,
    /// Where the text came from
    pub origin: ContentOrigin,
    /// Attachment state
    pub media: MediaSlot,
}

impl DecryptedMessage {
    /// Plaintext that was never encrypted.
    pub fn legacy(content: impl Into<String>, media_url: Option<RemoteUrl>) -> Self {
        Self {
            plaintext: content.into(),
            origin: ContentOrigin::Legacy,
            media: media_url.map_or(MediaSlot::None, MediaSlot::Remote),
        }
    }

    /// Envelope that could not be decoded, kept as its raw content.
    pub fn undecodable(content: impl Into<String>, media_url: Option<RemoteUrl>) -> Self {
        Self { origin: ContentOrigin::Undecodable, ..Self::legacy(content, media_url) }
    }

    /// Check if the message showed its raw content because its envelope
    /// could not be decoded.
    pub fn is_undecodable(&self) -> bool {
        self.origin == ContentOrigin::Undecodable
    }
}
