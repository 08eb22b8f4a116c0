//! Local resource handles for decrypted media.
//!
//! Decrypted bytes are materialized into an addressable, revocable resource.
//! The UI only ever sees the handle's URI. Every handle is released exactly
//! when its cache entry is evicted.

use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tempfile::TempPath;

use crate::error::MediaError;

/// Media type used when an envelope does not carry one.
pub const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Addressable handle to decrypted media.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    /// URI the UI renders from (`mem://…` or `file://…`)
    pub uri: String,
    /// MIME type of the decrypted content
    pub media_type: String,
    /// Decrypted size in bytes
    pub len: u64,
}

/// Turns decrypted bytes into handles and revokes them.
pub trait MediaMaterializer: Send + Sync + 'static {
    /// Store `bytes` and return a handle addressing them.
    fn materialize(&self, bytes: Vec<u8>, media_type: &str) -> Result<MediaHandle, MediaError>;

    /// Revoke a handle. Releasing an unknown or already released handle is a
    /// no-op.
    fn release(&self, handle: &MediaHandle);
}

/// In-memory materializer. Handles are `mem://media/{n}` URIs.
#[derive(Default)]
pub struct InMemoryMaterializer {
    blobs: Mutex<HashMap<String, Arc<[u8]>>>,
    next_id: AtomicU64,
}

impl InMemoryMaterializer {
    /// Create an empty materializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes behind a live handle. `None` once released.
    pub fn read(&self, handle: &MediaHandle) -> Option<Arc<[u8]>> {
        self.lock().get(&handle.uri).cloned()
    }

    /// Number of handles not yet released.
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<[u8]>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MediaMaterializer for InMemoryMaterializer {
    fn materialize(&self, bytes: Vec<u8>, media_type: &str) -> Result<MediaHandle, MediaError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = MediaHandle {
            uri: format!("mem://media/{id}"),
            media_type: media_type.to_owned(),
            len: bytes.len() as u64,
        };

        self.lock().insert(handle.uri.clone(), Arc::from(bytes));
        Ok(handle)
    }

    fn release(&self, handle: &MediaHandle) {
        self.lock().remove(&handle.uri);
    }
}

/// Temp-file materializer for non-browser hosts.
///
/// Each handle is a file in the configured directory, deleted on release or
/// when the materializer is dropped.
pub struct TempFileMaterializer {
    dir: PathBuf,
    files: Mutex<HashMap<String, TempPath>>,
}

impl TempFileMaterializer {
    /// Materialize into the system temp directory.
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    /// Materialize into `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), files: Mutex::new(HashMap::new()) }
    }

    /// Directory files are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files not yet released.
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TempPath>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TempFileMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaMaterializer for TempFileMaterializer {
    fn materialize(&self, bytes: Vec<u8>, media_type: &str) -> Result<MediaHandle, MediaError> {
        let mut file = tempfile::Builder::new()
            .prefix("hushline-media-")
            .tempfile_in(&self.dir)
            .map_err(|e| MediaError::Materialize(e.to_string()))?;

        file.write_all(&bytes).map_err(|e| MediaError::Materialize(e.to_string()))?;
        file.flush().map_err(|e| MediaError::Materialize(e.to_string()))?;

        let path = file.into_temp_path();
        let handle = MediaHandle {
            uri: format!("file://{}", path.display()),
            media_type: media_type.to_owned(),
            len: bytes.len() as u64,
        };

        self.lock().insert(handle.uri.clone(), path);
        Ok(handle)
    }

    fn release(&self, handle: &MediaHandle) {
        // Dropping the TempPath deletes the file
        let removed = self.lock().remove(&handle.uri);
        if let Some(path) = removed
            && let Err(e) = path.close()
        {
            tracing::warn!(uri = %handle.uri, error = %e, "failed to delete media file");
        }
    }
}
