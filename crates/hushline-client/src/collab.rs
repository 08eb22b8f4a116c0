//! External collaborators at the pipeline boundary.
//!
//! The pipelines never see delivery protocols or storage providers. Host
//! applications implement these traits over their REST/socket stack; the
//! harness crate provides in-memory versions for tests.

use std::future::Future;

use hushline_proto::{Message, OutgoingMessage, RemoteUrl};

use crate::error::{StorageError, TransportError};

/// Opaque blob storage.
///
/// The pipelines only ever hand it encrypted bytes.
pub trait Storage: Send + Sync + 'static {
    /// Upload bytes and return their remote location.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload did not complete. Callers may retry.
    fn upload(
        &self,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<RemoteUrl, StorageError>> + Send;

    /// Fetch the raw bytes previously uploaded to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is missing or storage is unreachable.
    fn fetch(&self, url: &RemoteUrl) -> impl Future<Output = Result<Vec<u8>, StorageError>> + Send;
}

/// Message persistence and broadcast.
pub trait Transport: Send + Sync + 'static {
    /// Persist and broadcast a message.
    ///
    /// Returns the authoritative record, including the backend-assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend did not persist the message.
    fn publish(
        &self,
        message: OutgoingMessage,
    ) -> impl Future<Output = Result<Message, TransportError>> + Send;
}
